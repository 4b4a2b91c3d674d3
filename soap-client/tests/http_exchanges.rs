//! SOAP and GENA requests against a mock device.

use mockito::{Matcher, Server};
use soap_client::{SoapClient, SoapError};

const AV_TRANSPORT: &str = "urn:schemas-upnp-org:service:AVTransport:1";

#[tokio::test]
async fn test_call_returns_action_response() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/AVTransport/control")
        .match_header("soapaction", format!("\"{AV_TRANSPORT}#Play\"").as_str())
        .match_body(Matcher::Regex("<InstanceID>0</InstanceID><Speed>1</Speed>".to_string()))
        .with_status(200)
        .with_header("content-type", "text/xml")
        .with_body(format!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><u:PlayResponse xmlns:u="{AV_TRANSPORT}"/></s:Body></s:Envelope>"#
        ))
        .create_async()
        .await;

    let client = SoapClient::new();
    let url = format!("{}/AVTransport/control", server.url());
    let response = client
        .call(&url, AV_TRANSPORT, "Play", &[("InstanceID", "0"), ("Speed", "1")])
        .await
        .unwrap();

    assert_eq!(response.name, "PlayResponse");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_call_maps_fault_body_on_500() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/ctl")
        .with_status(500)
        .with_body(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0"><errorCode>701</errorCode></UPnPError></detail></s:Fault></s:Body></s:Envelope>"#,
        )
        .create_async()
        .await;

    let result = SoapClient::new()
        .call(&format!("{}/ctl", server.url()), AV_TRANSPORT, "Play", &[])
        .await;
    assert!(matches!(result, Err(SoapError::Fault(701))));
}

#[tokio::test]
async fn test_call_maps_plain_error_status() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/ctl")
        .with_status(404)
        .with_body("not here")
        .create_async()
        .await;

    let result = SoapClient::new()
        .call(&format!("{}/ctl", server.url()), AV_TRANSPORT, "Stop", &[])
        .await;
    assert!(matches!(result, Err(SoapError::Status(404))));
}

#[tokio::test]
async fn test_subscribe_sends_gena_headers() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("SUBSCRIBE", "/AVTransport/event")
        .match_header("callback", "<http://10.0.0.5:8444/events/>")
        .match_header("nt", "upnp:event")
        .match_header("timeout", "Second-1800")
        .with_status(200)
        .with_header("SID", "uuid:sub-1")
        .with_header("TIMEOUT", "Second-300")
        .create_async()
        .await;

    let response = SoapClient::new()
        .subscribe(
            &format!("{}/AVTransport/event", server.url()),
            "http://10.0.0.5:8444/events/",
            1800,
        )
        .await
        .unwrap();

    assert_eq!(response.sid, "uuid:sub-1");
    assert_eq!(response.timeout_seconds, 300);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_subscribe_without_sid_is_parse_error() {
    let mut server = Server::new_async().await;
    server
        .mock("SUBSCRIBE", "/evt")
        .with_status(200)
        .create_async()
        .await;

    let result = SoapClient::new()
        .subscribe(&format!("{}/evt", server.url()), "http://cb/", 1800)
        .await;
    assert!(matches!(result, Err(SoapError::Parse(_))));
}

#[tokio::test]
async fn test_renewal_sends_sid_only_and_reports_new_sid() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("SUBSCRIBE", "/evt")
        .match_header("sid", "uuid:old")
        .match_header("callback", Matcher::Missing)
        .match_header("nt", Matcher::Missing)
        .with_status(200)
        .with_header("SID", "uuid:new")
        .with_header("TIMEOUT", "Second-1800")
        .create_async()
        .await;

    let response = SoapClient::new()
        .renew_subscription(&format!("{}/evt", server.url()), "uuid:old", 1800)
        .await
        .unwrap();

    assert_eq!(response.sid, "uuid:new");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_renewal_keeps_sid_when_device_omits_it() {
    let mut server = Server::new_async().await;
    server
        .mock("SUBSCRIBE", "/evt")
        .with_status(200)
        .create_async()
        .await;

    let response = SoapClient::new()
        .renew_subscription(&format!("{}/evt", server.url()), "uuid:same", 900)
        .await
        .unwrap();

    assert_eq!(response.sid, "uuid:same");
    assert_eq!(response.timeout_seconds, 900);
}

#[tokio::test]
async fn test_unsubscribe_reports_failure_status() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("UNSUBSCRIBE", "/evt")
        .match_header("sid", "uuid:gone")
        .with_status(412)
        .create_async()
        .await;

    let result = SoapClient::new()
        .unsubscribe(&format!("{}/evt", server.url()), "uuid:gone")
        .await;

    assert!(matches!(result, Err(SoapError::Status(412))));
    mock.assert_async().await;
}

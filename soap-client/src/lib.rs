//! SOAP client for UPnP device communication
//!
//! Sends SOAP action requests to a service's control URL and the GENA
//! SUBSCRIBE/UNSUBSCRIBE requests used for event subscriptions. All requests
//! are asynchronous and bounded by the client timeout so a hung device cannot
//! stall its caller.

pub mod didl;
mod error;

pub use error::{Result, SoapError};

use std::time::Duration;

use quick_xml::escape::escape;
use reqwest::{Method, Response};
use tracing::{debug, trace};
use url::Url;
use xmltree::Element;

/// Default bound on every request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Response from a subscription or renewal request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResponse {
    /// Subscription ID returned by the device
    pub sid: String,
    /// Actual timeout granted by the device (in seconds)
    pub timeout_seconds: u32,
}

/// A minimal SOAP client for UPnP device communication
#[derive(Debug, Clone)]
pub struct SoapClient {
    http: reqwest::Client,
}

impl SoapClient {
    /// Create a new SOAP client with the default 5 second timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    /// Invoke `action` on the service at `control_url`.
    ///
    /// Arguments are sent in the given order. Returns the
    /// `<{action}Response>` element.
    pub async fn call(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<Element> {
        let url = parse_url(control_url)?;
        let body = envelope(service_type, action, args);
        let soap_action = format!("\"{service_type}#{action}\"");
        trace!(%url, action, "SOAP request");

        let response = self
            .http
            .post(url)
            .header("Content-Type", "text/xml; charset=\"utf-8\"")
            .header("SOAPACTION", soap_action)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let xml_text = response.text().await?;

        if !status.is_success() {
            // UPnP errors come back as 500 with a fault body.
            let code = Element::parse(xml_text.as_bytes())
                .ok()
                .and_then(|xml| fault_code(&xml));
            debug!(action, status = status.as_u16(), ?code, "SOAP action failed");
            return Err(match code {
                Some(code) => SoapError::Fault(code),
                None => SoapError::Status(status.as_u16()),
            });
        }

        let xml =
            Element::parse(xml_text.as_bytes()).map_err(|e| SoapError::Parse(e.to_string()))?;

        // Extract response or handle SOAP fault
        self.extract_response(&xml, action)
    }

    /// Subscribe to events of the service at `event_url`.
    ///
    /// # Returns
    /// A `SubscriptionResponse` containing the SID and the granted timeout,
    /// falling back to the requested timeout if the device omits it.
    pub async fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse> {
        let response = self
            .http
            .request(gena_method("SUBSCRIBE")?, parse_url(event_url)?)
            .header("CALLBACK", format!("<{callback_url}>"))
            .header("NT", "upnp:event")
            .header("TIMEOUT", format!("Second-{timeout_seconds}"))
            .send()
            .await?;
        let response = ensure_success(response)?;

        let sid = header(&response, "SID")
            .ok_or_else(|| SoapError::Parse("Missing SID header in SUBSCRIBE response".to_string()))?;

        Ok(SubscriptionResponse {
            sid,
            timeout_seconds: granted_timeout(&response).unwrap_or(timeout_seconds),
        })
    }

    /// Renew an existing subscription.
    ///
    /// The device may answer with a different SID; the returned response
    /// carries whichever SID is now current.
    pub async fn renew_subscription(
        &self,
        event_url: &str,
        sid: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse> {
        let response = self
            .http
            .request(gena_method("SUBSCRIBE")?, parse_url(event_url)?)
            .header("SID", sid)
            .header("TIMEOUT", format!("Second-{timeout_seconds}"))
            .send()
            .await?;
        let response = ensure_success(response)?;

        Ok(SubscriptionResponse {
            sid: header(&response, "SID").unwrap_or_else(|| sid.to_string()),
            timeout_seconds: granted_timeout(&response).unwrap_or(timeout_seconds),
        })
    }

    /// Cancel a subscription.
    pub async fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<()> {
        let response = self
            .http
            .request(gena_method("UNSUBSCRIBE")?, parse_url(event_url)?)
            .header("SID", sid)
            .send()
            .await?;
        ensure_success(response)?;
        Ok(())
    }

    fn extract_response(&self, xml: &Element, action: &str) -> Result<Element> {
        let body = xml
            .get_child("Body")
            .ok_or_else(|| SoapError::Parse("Missing SOAP Body".to_string()))?;

        // Check for SOAP fault first
        if body.get_child("Fault").is_some() {
            return Err(SoapError::Fault(fault_code(xml).unwrap_or(500)));
        }

        // Extract the action response
        let response_name = format!("{action}Response");
        body.get_child(response_name.as_str())
            .cloned()
            .ok_or_else(|| SoapError::Parse(format!("Missing {response_name} element")))
    }
}

impl Default for SoapClient {
    fn default() -> Self {
        Self::new()
    }
}

fn envelope(service_type: &str, action: &str, args: &[(&str, &str)]) -> String {
    let payload: String = args
        .iter()
        .map(|(name, value)| format!("<{name}>{}</{name}>", escape(value)))
        .collect();

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">"#,
            r#"<s:Body><u:{action} xmlns:u="{service_type}">{payload}</u:{action}></s:Body>"#,
            "</s:Envelope>"
        ),
        action = action,
        service_type = service_type,
        payload = payload,
    )
}

/// UPnP error code of a fault envelope, if it is one.
fn fault_code(xml: &Element) -> Option<u16> {
    let fault = xml.get_child("Body")?.get_child("Fault")?;
    Some(
        fault
            .get_child("detail")
            .and_then(|d| d.get_child("UPnPError"))
            .and_then(|e| e.get_child("errorCode"))
            .and_then(|c| c.get_text())
            .and_then(|t| t.trim().parse::<u16>().ok())
            .unwrap_or(500),
    )
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| SoapError::InvalidUrl(format!("{url}: {e}")))
}

fn gena_method(name: &str) -> Result<Method> {
    Method::from_bytes(name.as_bytes()).map_err(|e| SoapError::Network(e.to_string()))
}

fn ensure_success(response: Response) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(SoapError::Status(response.status().as_u16()))
    }
}

fn header(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a `TIMEOUT: Second-<n>` header. `Second-infinite` yields `None`.
fn granted_timeout(response: &Response) -> Option<u32> {
    parse_timeout(&header(response, "TIMEOUT")?)
}

fn parse_timeout(value: &str) -> Option<u32> {
    let (prefix, seconds) = value.split_at(value.find('-')?);
    if !prefix.trim().eq_ignore_ascii_case("second") {
        return None;
    }
    seconds[1..].trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_extract_response_with_valid_response() {
        let client = SoapClient::new();

        let xml_str = r#"
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
                <s:Body>
                    <u:PlayResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">
                    </u:PlayResponse>
                </s:Body>
            </s:Envelope>
        "#;

        let xml = Element::parse(xml_str.as_bytes()).unwrap();
        let response = client.extract_response(&xml, "Play").unwrap();
        assert_eq!(response.name, "PlayResponse");
    }

    #[test]
    fn test_extract_response_with_soap_fault() {
        let client = SoapClient::new();

        let xml_str = r#"
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
                <s:Body>
                    <s:Fault>
                        <faultcode>s:Client</faultcode>
                        <faultstring>UPnPError</faultstring>
                        <detail>
                            <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
                                <errorCode>401</errorCode>
                                <errorDescription>Invalid Action</errorDescription>
                            </UPnPError>
                        </detail>
                    </s:Fault>
                </s:Body>
            </s:Envelope>
        "#;

        let xml = Element::parse(xml_str.as_bytes()).unwrap();
        match client.extract_response(&xml, "Play").unwrap_err() {
            SoapError::Fault(code) => assert_eq!(code, 401),
            other => panic!("Expected SoapError::Fault, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_response_missing_body() {
        let client = SoapClient::new();
        let xml = Element::parse(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"></s:Envelope>"#
                .as_bytes(),
        )
        .unwrap();

        match client.extract_response(&xml, "Play").unwrap_err() {
            SoapError::Parse(msg) => assert!(msg.contains("Missing SOAP Body")),
            other => panic!("Expected SoapError::Parse, got {other:?}"),
        }
    }

    #[test]
    fn test_soap_fault_with_default_error_code() {
        let client = SoapClient::new();

        let xml_str = r#"
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
                <s:Body>
                    <s:Fault>
                        <faultcode>s:Server</faultcode>
                        <faultstring>Internal Error</faultstring>
                    </s:Fault>
                </s:Body>
            </s:Envelope>
        "#;

        let xml = Element::parse(xml_str.as_bytes()).unwrap();
        match client.extract_response(&xml, "Play").unwrap_err() {
            SoapError::Fault(code) => assert_eq!(code, 500),
            other => panic!("Expected SoapError::Fault, got {other:?}"),
        }
    }

    #[test]
    fn test_envelope_orders_and_escapes_arguments() {
        let body = envelope(
            "urn:schemas-upnp-org:service:AVTransport:1",
            "SetAVTransportURI",
            &[("InstanceID", "0"), ("CurrentURI", "http://h/a?x=1&y=2")],
        );

        let xml = Element::parse(body.as_bytes()).unwrap();
        let action = xml
            .get_child("Body")
            .and_then(|b| b.get_child("SetAVTransportURI"))
            .unwrap();
        let names: Vec<&str> = action
            .children
            .iter()
            .filter_map(|c| c.as_element())
            .map(|e| e.name.as_str())
            .collect();

        assert_eq!(names, ["InstanceID", "CurrentURI"]);
        assert_eq!(
            action.get_child("CurrentURI").and_then(|e| e.get_text()).as_deref(),
            Some("http://h/a?x=1&y=2")
        );
    }

    #[rstest]
    #[case("Second-1800", Some(1800))]
    #[case("second-300", Some(300))]
    #[case("Second-infinite", None)]
    #[case("1800", None)]
    #[case("Minute-5", None)]
    fn test_parse_timeout(#[case] value: &str, #[case] expected: Option<u32>) {
        assert_eq!(parse_timeout(value), expected);
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(parse_url("not a url"), Err(SoapError::InvalidUrl(_))));
    }
}

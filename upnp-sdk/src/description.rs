//! UPnP device description documents.
//!
//! Only the structural parts are kept: device and service types, names, the
//! service URLs and the nested `deviceList`.

use serde::Deserialize;

use crate::error::{Result, SdkError};

#[derive(Debug, Deserialize)]
struct Root {
    device: DeviceDescription,
}

/// One `<device>` element, with its embedded devices.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescription {
    pub device_type: String,
    #[serde(default)]
    pub friendly_name: String,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    #[serde(rename = "UDN")]
    pub udn: Option<String>,
    #[serde(default)]
    pub service_list: ServiceList,
    #[serde(default)]
    pub device_list: DeviceList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceList {
    #[serde(rename = "service", default)]
    pub services: Vec<ServiceDescription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceList {
    #[serde(rename = "device", default)]
    pub devices: Vec<DeviceDescription>,
}

/// One `<service>` element. URLs are kept as written, usually relative to
/// the description location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceDescription {
    #[serde(rename = "serviceType")]
    pub service_type: String,
    #[serde(rename = "serviceId")]
    pub service_id: Option<String>,
    #[serde(rename = "controlURL", default)]
    pub control_url: String,
    #[serde(rename = "eventSubURL", default)]
    pub event_sub_url: String,
    #[serde(rename = "SCPDURL")]
    pub scpd_url: Option<String>,
}

impl DeviceDescription {
    /// Parse the root `<device>` of a description document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let root: Root = quick_xml::de::from_str(xml)
            .map_err(|e| SdkError::Description(format!("Failed to parse device XML: {e}")))?;
        Ok(root.device)
    }
}

/// Short name of a type URN: the component before the version.
///
/// `urn:schemas-upnp-org:service:AVTransport:1` becomes `AVTransport`.
/// Strings without two components are returned unchanged.
pub fn short_type_name(urn: &str) -> &str {
    let mut parts = urn.rsplit(':');
    match (parts.next(), parts.next()) {
        (Some(_), Some(name)) => name,
        _ => urn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const TWO_LEVEL: &str = include_str!("../tests/fixtures/two_level.xml");

    #[test]
    fn test_parse_nested_description() {
        let root = DeviceDescription::from_xml(TWO_LEVEL).unwrap();

        assert_eq!(root.friendly_name, "Den TV");
        assert_eq!(root.udn.as_deref(), Some("uuid:root-1"));
        assert_eq!(root.service_list.services.len(), 1);
        assert_eq!(root.service_list.services[0].control_url, "/cd/control");
        assert_eq!(root.service_list.services[0].scpd_url.as_deref(), Some("/cd.xml"));

        let child = &root.device_list.devices[0];
        assert_eq!(child.friendly_name, "Den TV Renderer");
        assert_eq!(child.service_list.services[0].event_sub_url, "/avt/event");
        assert!(child.device_list.devices.is_empty());
    }

    #[test]
    fn test_device_without_lists() {
        let xml = r#"<root><device><deviceType>urn:schemas-upnp-org:device:Basic:1</deviceType><friendlyName>Router</friendlyName></device></root>"#;
        let root = DeviceDescription::from_xml(xml).unwrap();
        assert!(root.service_list.services.is_empty());
        assert!(root.device_list.devices.is_empty());
    }

    #[test]
    fn test_malformed_description() {
        assert!(matches!(
            DeviceDescription::from_xml("<root><nothing/></root>"),
            Err(SdkError::Description(_))
        ));
    }

    #[rstest]
    #[case("urn:schemas-upnp-org:service:AVTransport:1", "AVTransport")]
    #[case("urn:schemas-upnp-org:device:MediaRenderer:1", "MediaRenderer")]
    #[case("Custom:2", "Custom")]
    #[case("NoColon", "NoColon")]
    fn test_short_type_name(#[case] urn: &str, #[case] expected: &str) {
        assert_eq!(short_type_name(urn), expected);
    }
}

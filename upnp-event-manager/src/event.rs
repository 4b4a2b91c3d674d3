//! State-variable events and `LastChange` parsing.
//!
//! AV services report changes through a single evented variable,
//! `LastChange`, whose text is an escaped XML document:
//!
//! ```xml
//! <e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
//!   <e:property>
//!     <LastChange>&lt;Event&gt;&lt;InstanceID val="0"&gt;
//!       &lt;TransportState val="PLAYING"/&gt;
//!     &lt;/InstanceID&gt;&lt;/Event&gt;</LastChange>
//!   </e:property>
//! </e:propertyset>
//! ```
//!
//! Every element directly under an `InstanceID` is one variable, its `val`
//! attribute the new value.

use std::fmt;

use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use tracing::trace;

use crate::error::{EventManagerError, Result};

/// A state variable with its current and previous value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub value: Option<String>,
    pub old_value: Option<String>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            old_value: None,
        }
    }

    /// Shift the current value into `old_value` and store `value`.
    pub fn update(&mut self, value: impl Into<String>) {
        self.old_value = self.value.replace(value.into());
    }

    /// Whether the last update changed the value.
    pub fn changed(&self) -> bool {
        self.value != self.old_value
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (was {})",
            self.name,
            self.value.as_deref().unwrap_or("-"),
            self.old_value.as_deref().unwrap_or("-")
        )
    }
}

/// Extract `(variable, value)` pairs from a notification body.
///
/// Returns an empty list when the body has no `LastChange` property.
pub fn parse_last_change(body: &str) -> Result<Vec<(String, String)>> {
    match last_change_text(body)? {
        Some(fragment) if !fragment.trim().is_empty() => instance_values(fragment.trim()),
        _ => Ok(Vec::new()),
    }
}

fn last_change_text(body: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(body);
    let mut inside = false;
    let mut text = String::new();

    loop {
        match reader.read_event().map_err(parse_error)? {
            XmlEvent::Start(e) if is_named(&e, b"LastChange") => inside = true,
            XmlEvent::Text(t) if inside => text.push_str(&t.unescape().map_err(parse_error)?),
            XmlEvent::CData(c) if inside => {
                let raw = c.into_inner();
                text.push_str(&String::from_utf8_lossy(&raw));
            }
            XmlEvent::End(e) if inside && e.local_name().as_ref() == b"LastChange" => {
                return Ok(Some(text));
            }
            XmlEvent::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn instance_values(fragment: &str) -> Result<Vec<(String, String)>> {
    let mut reader = Reader::from_str(fragment);
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut instance_depth: Option<usize> = None;

    loop {
        match reader.read_event().map_err(parse_error)? {
            XmlEvent::Start(e) => {
                depth += 1;
                if instance_depth.is_none() && is_named(&e, b"InstanceID") {
                    instance_depth = Some(depth);
                } else if instance_depth == Some(depth - 1) {
                    push_value(&e, &mut values)?;
                }
            }
            XmlEvent::Empty(e) => {
                if instance_depth == Some(depth) {
                    push_value(&e, &mut values)?;
                }
            }
            XmlEvent::End(_) => {
                if instance_depth == Some(depth) {
                    instance_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            XmlEvent::Eof => return Ok(values),
            _ => {}
        }
    }
}

fn push_value(element: &BytesStart<'_>, values: &mut Vec<(String, String)>) -> Result<()> {
    let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
    match element.try_get_attribute("val").map_err(parse_error)? {
        Some(attr) => {
            let value = attr.unescape_value().map_err(parse_error)?;
            values.push((name, value.into_owned()));
        }
        None => trace!(variable = %name, "Variable without val attribute skipped"),
    }
    Ok(())
}

fn is_named(element: &BytesStart<'_>, name: &[u8]) -> bool {
    element.local_name().as_ref() == name
}

fn parse_error(error: impl fmt::Display) -> EventManagerError {
    EventManagerError::Parse(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn propertyset(last_change: &str) -> String {
        format!(
            r#"<?xml version="1.0"?><e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><LastChange>{last_change}</LastChange></e:property></e:propertyset>"#
        )
    }

    #[test]
    fn test_parse_escaped_last_change() {
        let body = propertyset(
            "&lt;Event xmlns=&quot;urn:schemas-upnp-org:metadata-1-0/AVT/&quot;&gt;\
             &lt;InstanceID val=&quot;0&quot;&gt;\
             &lt;TransportState val=&quot;PLAYING&quot;/&gt;\
             &lt;CurrentTrackURI val=&quot;http://h/a?x=1&amp;amp;y=2&quot;/&gt;\
             &lt;/InstanceID&gt;&lt;/Event&gt;",
        );

        let values = parse_last_change(&body).unwrap();
        assert_eq!(
            values,
            vec![
                ("TransportState".to_string(), "PLAYING".to_string()),
                ("CurrentTrackURI".to_string(), "http://h/a?x=1&y=2".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_cdata_last_change() {
        let body = propertyset(
            r#"<![CDATA[<Event><InstanceID val="0"><Volume channel="Master" val="42"></Volume></InstanceID></Event>]]>"#,
        );

        let values = parse_last_change(&body).unwrap();
        assert_eq!(values, vec![("Volume".to_string(), "42".to_string())]);
    }

    #[test]
    fn test_nested_elements_below_variables_are_ignored() {
        let body = propertyset(
            "&lt;Event&gt;&lt;InstanceID val=&quot;0&quot;&gt;\
             &lt;Outer val=&quot;1&quot;&gt;&lt;Inner val=&quot;2&quot;/&gt;&lt;/Outer&gt;\
             &lt;NoValue/&gt;\
             &lt;/InstanceID&gt;&lt;/Event&gt;",
        );

        let values = parse_last_change(&body).unwrap();
        assert_eq!(values, vec![("Outer".to_string(), "1".to_string())]);
    }

    #[rstest]
    #[case(r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><Volume>5</Volume></e:property></e:propertyset>"#)]
    #[case(r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><LastChange></LastChange></e:property></e:propertyset>"#)]
    #[case("")]
    fn test_bodies_without_changes(#[case] body: &str) {
        assert!(parse_last_change(body).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_inner_document_is_an_error() {
        let body = propertyset("&lt;Event&gt;&lt;InstanceID val=&quot;0&quot;&gt;&lt;/Event&gt;");
        assert!(matches!(
            parse_last_change(&body),
            Err(EventManagerError::Parse(_))
        ));
    }

    #[test]
    fn test_event_update_tracks_previous_value() {
        let mut event = Event::new("TransportState");
        event.update("PLAYING");
        assert_eq!(event.value.as_deref(), Some("PLAYING"));
        assert_eq!(event.old_value, None);

        event.update("STOPPED");
        assert_eq!(event.value.as_deref(), Some("STOPPED"));
        assert_eq!(event.old_value.as_deref(), Some("PLAYING"));
        assert!(event.changed());

        event.update("STOPPED");
        assert!(!event.changed());
    }
}

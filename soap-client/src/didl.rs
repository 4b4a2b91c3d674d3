//! DIDL-Lite metadata for AVTransport URI actions.

use quick_xml::escape::escape;

const DIDL_NS: &str = "urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
const UPNP_NS: &str = "urn:schemas-upnp-org:metadata-1-0/upnp/";

/// DLNA flags advertising streaming transfer with byte seek support.
pub const DLNA_STREAMING_FLAGS: &str =
    "DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000";

/// `protocolInfo` for an HTTP resource of the given MIME type.
pub fn dlna_protocol_info(mime: &str) -> String {
    format!("http-get:*:{mime}:{DLNA_STREAMING_FLAGS}")
}

/// A `<res>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub protocol_info: String,
    pub uri: String,
}

impl Resource {
    /// HTTP resource with DLNA streaming flags.
    pub fn http(uri: impl Into<String>, mime: &str) -> Self {
        Self {
            protocol_info: dlna_protocol_info(mime),
            uri: uri.into(),
        }
    }
}

/// An `object.item.videoItem` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoItem {
    pub id: String,
    pub parent_id: String,
    pub restricted: bool,
    pub title: String,
    pub resource: Resource,
}

impl VideoItem {
    pub fn new(title: impl Into<String>, resource: Resource) -> Self {
        Self {
            id: "0".to_string(),
            parent_id: "-1".to_string(),
            restricted: false,
            title: title.into(),
            resource,
        }
    }

    /// Render as a complete DIDL-Lite document.
    pub fn to_didl(&self) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<DIDL-Lite xmlns="{didl}" xmlns:dc="{dc}" xmlns:upnp="{upnp}">"#,
                r#"<item id="{id}" parentID="{parent}" restricted="{restricted}">"#,
                "<dc:title>{title}</dc:title>",
                "<upnp:class>object.item.videoItem</upnp:class>",
                r#"<res protocolInfo="{protocol_info}">{uri}</res>"#,
                "</item></DIDL-Lite>"
            ),
            didl = DIDL_NS,
            dc = DC_NS,
            upnp = UPNP_NS,
            id = escape(&self.id),
            parent = escape(&self.parent_id),
            restricted = u8::from(self.restricted),
            title = escape(&self.title),
            protocol_info = escape(&self.resource.protocol_info),
            uri = escape(&self.resource.uri),
        )
    }
}

/// Metadata for playing `uri` as a video item titled `title`.
pub fn video_item_metadata(uri: &str, title: &str, mime: &str) -> String {
    VideoItem::new(title, Resource::http(uri, mime)).to_didl()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_info() {
        assert_eq!(
            dlna_protocol_info("video/mp4"),
            "http-get:*:video/mp4:DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000"
        );
    }

    #[test]
    fn test_video_item_metadata() {
        let didl = video_item_metadata("http://10.0.0.5:8080/movie.mkv", "Movie", "video/x-matroska");

        assert!(didl.starts_with(r#"<?xml version="1.0" encoding="utf-8"?><DIDL-Lite"#));
        assert!(didl.contains("<dc:title>Movie</dc:title>"));
        assert!(didl.contains("<upnp:class>object.item.videoItem</upnp:class>"));
        assert!(didl.contains(r#"protocolInfo="http-get:*:video/x-matroska:DLNA.ORG_OP=01;"#));
        assert!(didl.contains(">http://10.0.0.5:8080/movie.mkv</res>"));
        assert!(didl.contains(r#"restricted="0""#));
    }

    #[test]
    fn test_metadata_is_escaped() {
        let didl = video_item_metadata("http://h/a?x=1&y=2", "Tom & Jerry <1>", "video/mp4");

        assert!(didl.contains("<dc:title>Tom &amp; Jerry &lt;1&gt;</dc:title>"));
        assert!(didl.contains(">http://h/a?x=1&amp;y=2</res>"));
        // Must stay well-formed
        assert!(xmltree::Element::parse(didl.as_bytes()).is_ok());
    }
}

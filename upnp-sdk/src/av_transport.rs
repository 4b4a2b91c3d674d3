//! Typed actions of the AVTransport service.

use std::ops::Deref;
use std::sync::Arc;

use soap_client::didl::video_item_metadata;
use xmltree::Element;

use crate::error::Result;
use crate::service::Service;

pub const AV_TRANSPORT: &str = "AVTransport";

/// Every action targets the single transport instance of a renderer.
const INSTANCE_ID: (&str, &str) = ("InstanceID", "0");

/// An AVTransport service with convenience methods for its common actions.
///
/// Dereferences to the underlying [`Service`].
#[derive(Debug, Clone)]
pub struct AvTransport {
    service: Arc<Service>,
}

impl AvTransport {
    /// Wrap `service` if its short type is `AVTransport`.
    pub fn new(service: Arc<Service>) -> Option<Self> {
        (service.short_type() == AV_TRANSPORT).then_some(Self { service })
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    pub async fn stop(&self) -> Result<Element> {
        self.service.invoke("Stop", &[INSTANCE_ID]).await
    }

    pub async fn play(&self) -> Result<Element> {
        self.service.invoke("Play", &[INSTANCE_ID, ("Speed", "1")]).await
    }

    pub async fn pause(&self) -> Result<Element> {
        self.service.invoke("Pause", &[INSTANCE_ID]).await
    }

    /// `mode` is one of the renderer's play modes, e.g. `NORMAL` or `REPEAT_ALL`.
    pub async fn set_play_mode(&self, mode: &str) -> Result<Element> {
        self.service
            .invoke("SetPlayMode", &[INSTANCE_ID, ("NewPlayMode", mode)])
            .await
    }

    /// Load `uri` as the current media, described as a video item.
    pub async fn set_av_transport_uri(&self, uri: &str, title: &str, mime: &str) -> Result<Element> {
        let metadata = video_item_metadata(uri, title, mime);
        self.service
            .invoke(
                "SetAVTransportURI",
                &[INSTANCE_ID, ("CurrentURI", uri), ("CurrentURIMetaData", metadata.as_str())],
            )
            .await
    }

    /// Queue `uri` to play after the current media.
    pub async fn set_next_av_transport_uri(
        &self,
        uri: &str,
        title: &str,
        mime: &str,
    ) -> Result<Element> {
        let metadata = video_item_metadata(uri, title, mime);
        self.service
            .invoke(
                "SetNextAVTransportURI",
                &[INSTANCE_ID, ("NextURI", uri), ("NextURIMetaData", metadata.as_str())],
            )
            .await
    }
}

impl Deref for AvTransport {
    type Target = Service;

    fn deref(&self) -> &Service {
        &self.service
    }
}

//! CRI (`runtime.v1`) client over a local unix socket.
//!
//! Only the three calls the pipeline needs are modelled. Messages carry the
//! upstream field numbers so they stay wire-compatible with containerd, CRI-O
//! and dockershim; unknown fields are skipped by prost on decode.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use http::Uri;
use http::uri::PathAndQuery;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::codec::ProstCodec;
use tonic::transport::{Channel, Endpoint};
use tower::service_fn;

use crate::core::errors::{EraserError, Result};
use crate::core::model::{Container, ContainerState, Image};
use crate::runtime::RuntimeClient;
use crate::runtime::endpoint::RuntimeEndpoint;

const LIST_IMAGES: &str = "/runtime.v1.ImageService/ListImages";
const REMOVE_IMAGE: &str = "/runtime.v1.ImageService/RemoveImage";
const LIST_CONTAINERS: &str = "/runtime.v1.RuntimeService/ListContainers";

// ──────────────────── wire messages ────────────────────

pub mod proto {
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ImageSpec {
        #[prost(string, tag = "1")]
        pub image: String,
        #[prost(map = "string, string", tag = "2")]
        pub annotations: HashMap<String, String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ImageFilter {
        #[prost(message, optional, tag = "1")]
        pub image: Option<ImageSpec>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ListImagesRequest {
        #[prost(message, optional, tag = "1")]
        pub filter: Option<ImageFilter>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Image {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(string, repeated, tag = "2")]
        pub repo_tags: Vec<String>,
        #[prost(string, repeated, tag = "3")]
        pub repo_digests: Vec<String>,
        #[prost(uint64, tag = "4")]
        pub size: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ListImagesResponse {
        #[prost(message, repeated, tag = "1")]
        pub images: Vec<Image>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RemoveImageRequest {
        #[prost(message, optional, tag = "1")]
        pub image: Option<ImageSpec>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RemoveImageResponse {}

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum ContainerState {
        ContainerCreated = 0,
        ContainerRunning = 1,
        ContainerExited = 2,
        ContainerUnknown = 3,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ContainerStateValue {
        #[prost(enumeration = "ContainerState", tag = "1")]
        pub state: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ContainerFilter {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(message, optional, tag = "2")]
        pub state: Option<ContainerStateValue>,
        #[prost(string, tag = "3")]
        pub pod_sandbox_id: String,
        #[prost(map = "string, string", tag = "4")]
        pub label_selector: HashMap<String, String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ListContainersRequest {
        #[prost(message, optional, tag = "1")]
        pub filter: Option<ContainerFilter>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ContainerMetadata {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(uint32, tag = "2")]
        pub attempt: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Container {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(string, tag = "2")]
        pub pod_sandbox_id: String,
        #[prost(message, optional, tag = "3")]
        pub metadata: Option<ContainerMetadata>,
        #[prost(message, optional, tag = "4")]
        pub image: Option<ImageSpec>,
        #[prost(string, tag = "5")]
        pub image_ref: String,
        #[prost(enumeration = "ContainerState", tag = "6")]
        pub state: i32,
        #[prost(int64, tag = "7")]
        pub created_at: i64,
        #[prost(map = "string, string", tag = "8")]
        pub labels: HashMap<String, String>,
        #[prost(map = "string, string", tag = "9")]
        pub annotations: HashMap<String, String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ListContainersResponse {
        #[prost(message, repeated, tag = "1")]
        pub containers: Vec<Container>,
    }
}

// ──────────────────── conversions ────────────────────

impl From<proto::Image> for Image {
    fn from(raw: proto::Image) -> Self {
        let mut tags: Vec<String> = Vec::with_capacity(raw.repo_tags.len() + raw.repo_digests.len());
        for reference in raw.repo_tags.into_iter().chain(raw.repo_digests) {
            if !reference.is_empty() && !tags.contains(&reference) {
                tags.push(reference);
            }
        }
        Self {
            digest: raw.id,
            tags,
            size: (raw.size > 0).then_some(raw.size),
        }
    }
}

impl From<proto::Container> for Container {
    fn from(raw: proto::Container) -> Self {
        let state = match proto::ContainerState::try_from(raw.state) {
            Ok(proto::ContainerState::ContainerCreated) => ContainerState::Created,
            Ok(proto::ContainerState::ContainerRunning) => ContainerState::Running,
            Ok(proto::ContainerState::ContainerExited) => ContainerState::Exited,
            Ok(proto::ContainerState::ContainerUnknown) | Err(_) => ContainerState::Unknown,
        };
        Self {
            id: raw.id,
            image: raw.image.map(|spec| spec.image).unwrap_or_default(),
            image_ref: raw.image_ref,
            state,
        }
    }
}

// ──────────────────── client ────────────────────

/// CRI client bound to one runtime socket.
#[derive(Debug, Clone)]
pub struct CriClient {
    channel: Channel,
    target: String,
}

impl CriClient {
    /// Dial the runtime socket, giving up after `dial_timeout`.
    ///
    /// `call_timeout` bounds every subsequent RPC.
    pub async fn connect(
        endpoint: &RuntimeEndpoint,
        dial_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self> {
        let target = endpoint.uri();
        let socket: PathBuf = endpoint.socket().to_path_buf();

        // The authority is ignored; the connector always dials the socket.
        let channel_endpoint = Endpoint::try_from("http://[::]:50051")?
            .connect_timeout(dial_timeout)
            .timeout(call_timeout);
        let connect = channel_endpoint.connect_with_connector(service_fn(move |_: Uri| {
                let socket = socket.clone();
                async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(socket).await?)) }
            }));

        let channel = tokio::time::timeout(dial_timeout, connect)
            .await
            .map_err(|_| EraserError::Connection {
                target: target.clone(),
                details: format!("dial timed out after {}s", dial_timeout.as_secs()),
            })?
            .map_err(|err| EraserError::Connection {
                target: target.clone(),
                details: err.to_string(),
            })?;

        Ok(Self { channel, target })
    }

    /// Endpoint this client is bound to, in `unix://` form.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    async fn unary<Req, Resp>(
        &self,
        path: &'static str,
        operation: &'static str,
        subject: &str,
        request: Req,
    ) -> Result<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready().await.map_err(|err| EraserError::Connection {
            target: self.target.clone(),
            details: format!("service not ready: {err}"),
        })?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await
            .map_err(|status| EraserError::from_status(operation, subject, &status))?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl RuntimeClient for CriClient {
    async fn list_images(&self) -> Result<Vec<Image>> {
        let response: proto::ListImagesResponse = self
            .unary(
                LIST_IMAGES,
                "list_images",
                &self.target,
                proto::ListImagesRequest::default(),
            )
            .await?;
        Ok(response.images.into_iter().map(Image::from).collect())
    }

    async fn list_containers(&self) -> Result<Vec<Container>> {
        let response: proto::ListContainersResponse = self
            .unary(
                LIST_CONTAINERS,
                "list_containers",
                &self.target,
                proto::ListContainersRequest::default(),
            )
            .await?;
        Ok(response
            .containers
            .into_iter()
            .map(Container::from)
            .collect())
    }

    async fn remove_image(&self, handle: &str) -> Result<()> {
        let request = proto::RemoveImageRequest {
            image: Some(proto::ImageSpec {
                image: handle.to_string(),
                annotations: HashMap::new(),
            }),
        };
        let _: proto::RemoveImageResponse = self
            .unary(REMOVE_IMAGE, "remove_image", handle, request)
            .await?;
        Ok(())
    }
}

//! Typed proxies: one wrapper per component family, layering that family's
//! command vocabulary over the shared socket machinery.

use async_trait::async_trait;
use bytes::Bytes;
use seeker_contracts::{
    ChannelizerCommand, ComponentContract, ControlCommand, DetectorCommand,
    DetectorTuneOrder, IfChainCommand, Intrinsics, MessageCode, StatusReport,
    TelescopeCommand, TestSignalCommand, WireError,
};
use seeker_model::{ActivityId, ComponentKind, FrequencyBand, WireTimestamp};

use super::{ComponentProxy, ManagedProxy};

macro_rules! component_proxy_kind {
    ($name:ident, $kind:expr) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            inner: ComponentProxy,
        }

        impl ManagedProxy for $name {
            fn kind() -> ComponentKind {
                $kind
            }

            fn from_inner(inner: ComponentProxy) -> Self {
                Self { inner }
            }

            fn inner(&self) -> &ComponentProxy {
                &self.inner
            }
        }

        #[async_trait]
        impl ComponentContract for $name {
            fn name(&self) -> String {
                self.inner.name()
            }

            fn remote_host(&self) -> String {
                self.inner.remote_host()
            }

            fn cached_intrinsics(&self) -> Option<Intrinsics> {
                self.inner.cached_intrinsics()
            }

            fn cached_status(&self) -> Option<StatusReport> {
                self.inner.cached_status()
            }

            fn valid_interface_version(&self) -> bool {
                self.inner.valid_interface_version()
            }

            async fn request_intrinsics(&self) -> Result<(), WireError> {
                self.inner.request_intrinsics().await
            }

            async fn request_status(&self) -> Result<(), WireError> {
                self.inner.request_status().await
            }

            async fn send_command(
                &self,
                code: MessageCode,
                activity_id: ActivityId,
                body: Bytes,
            ) -> Result<(), WireError> {
                self.inner.send_command(code, activity_id, body).await
            }

            async fn shutdown(&self) {
                self.inner.shutdown().await
            }

            async fn reset_socket(&self) {
                self.inner.reset_socket().await
            }
        }
    };
}

component_proxy_kind!(TelescopeProxy, ComponentKind::Telescope);
component_proxy_kind!(IfChainProxy, ComponentKind::IfChain);
component_proxy_kind!(TestSignalProxy, ComponentKind::TestSignal);
component_proxy_kind!(DetectorProxy, ComponentKind::Detector);
component_proxy_kind!(ArchiverProxy, ComponentKind::Archiver);
component_proxy_kind!(ChannelizerProxy, ComponentKind::Channelizer);
component_proxy_kind!(ControlProxy, ComponentKind::Control);

impl TelescopeProxy {
    pub async fn command(
        &self,
        activity_id: ActivityId,
        command: &TelescopeCommand,
    ) -> Result<(), WireError> {
        self.inner
            .send_command(command.code(), activity_id, command.body())
            .await
    }
}

impl IfChainProxy {
    pub async fn command(
        &self,
        activity_id: ActivityId,
        command: &IfChainCommand,
    ) -> Result<(), WireError> {
        self.inner
            .send_command(MessageCode::Message, activity_id, command.render())
            .await
    }
}

impl TestSignalProxy {
    pub async fn command(
        &self,
        activity_id: ActivityId,
        command: &TestSignalCommand,
    ) -> Result<(), WireError> {
        self.inner
            .send_command(MessageCode::Message, activity_id, command.render())
            .await
    }

    pub async fn quiet(&self, activity_id: ActivityId) -> Result<(), WireError> {
        self.command(activity_id, &TestSignalCommand::Quiet).await
    }
}

/// Pull the value following `key` out of a capabilities string such as
/// `"bandwidth 2.1 MHz"` or `"channels 256"`.
fn capability_value<T: std::str::FromStr>(intrinsics: Option<Intrinsics>, key: &str) -> Option<T> {
    let caps = intrinsics?.capabilities;
    let mut tokens = caps.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == key {
            return tokens.next().and_then(|v| v.parse().ok());
        }
    }
    None
}

impl DetectorProxy {
    /// Channel bandwidth this detector consumes, parsed from the
    /// `bandwidth <mhz> MHz` capabilities string; falls back to the given
    /// default when the component does not report one.
    pub fn bandwidth_mhz(&self, default_mhz: f64) -> f64 {
        capability_value(self.cached_intrinsics(), "bandwidth").unwrap_or(default_mhz)
    }

    pub async fn tune(
        &self,
        activity_id: ActivityId,
        order: &DetectorTuneOrder,
    ) -> Result<(), WireError> {
        self.inner
            .send_command(DetectorCommand::Tune.code(), activity_id, order.pack())
            .await
    }

    pub async fn send_start_time(
        &self,
        activity_id: ActivityId,
        start: WireTimestamp,
    ) -> Result<(), WireError> {
        let mut body = bytes::BytesMut::with_capacity(8);
        use bytes::BufMut;
        body.put_u32(start.secs);
        body.put_u32(start.micros);
        self.inner
            .send_command(DetectorCommand::StartTime.code(), activity_id, body.freeze())
            .await
    }

    pub async fn send_recent_rfi_mask(
        &self,
        activity_id: ActivityId,
        mask: &[FrequencyBand],
    ) -> Result<(), WireError> {
        let mut body = bytes::BytesMut::with_capacity(4 + mask.len() * 16);
        use bytes::BufMut;
        body.put_u32(mask.len() as u32);
        for band in mask {
            body.put_f64(band.center_mhz);
            body.put_f64(band.width_mhz);
        }
        self.inner
            .send_command(
                DetectorCommand::RecentRfiMask.code(),
                activity_id,
                body.freeze(),
            )
            .await
    }

    pub async fn forward_followup_candidates(
        &self,
        activity_id: ActivityId,
        body: Bytes,
    ) -> Result<(), WireError> {
        self.inner
            .send_command(
                DetectorCommand::FollowUpCandidates.code(),
                activity_id,
                body,
            )
            .await
    }

    pub async fn resolve_candidates(
        &self,
        activity_id: ActivityId,
        body: Bytes,
    ) -> Result<(), WireError> {
        self.inner
            .send_command(DetectorCommand::ResolveCandidates.code(), activity_id, body)
            .await
    }

    pub async fn stop(&self, activity_id: ActivityId) -> Result<(), WireError> {
        self.inner
            .send_command(DetectorCommand::Stop.code(), activity_id, Bytes::new())
            .await
    }
}

impl ChannelizerProxy {
    /// Channels this channelizer produces, parsed from the `channels <n>`
    /// capabilities string; falls back to the given default.
    pub fn total_channels(&self, default_channels: i32) -> i32 {
        capability_value(self.cached_intrinsics(), "channels").unwrap_or(default_channels)
    }

    pub async fn command(
        &self,
        activity_id: ActivityId,
        command: &ChannelizerCommand,
    ) -> Result<(), WireError> {
        self.inner
            .send_command(command.code(), activity_id, command.body())
            .await
    }

    pub async fn start(
        &self,
        activity_id: ActivityId,
        start_secs: u32,
        center_sky_freq_mhz: f64,
    ) -> Result<(), WireError> {
        self.command(
            activity_id,
            &ChannelizerCommand::Start {
                start_secs,
                center_sky_freq_mhz,
            },
        )
        .await
    }

    pub async fn stop(&self, activity_id: ActivityId) -> Result<(), WireError> {
        self.command(activity_id, &ChannelizerCommand::Stop).await
    }
}

impl ControlProxy {
    pub async fn command(&self, command: &ControlCommand) -> Result<(), WireError> {
        self.inner
            .send_command(MessageCode::Message, ActivityId::NONE, command.render())
            .await
    }

    pub async fn restart_component(&self, component: &str) -> Result<(), WireError> {
        self.command(&ControlCommand::Restart {
            component: component.to_string(),
        })
        .await
    }
}

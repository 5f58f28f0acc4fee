// SPDX-License-Identifier: MIT OR Apache-2.0

//! Which camera to record from, and whether it answers.

use std::net::IpAddr;

use anyhow::{anyhow, Error};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::ffmpeg::Tools;
use crate::tool::ToolRunner;

/// Host name a Seestar announces over mDNS.
pub const DEFAULT_HOST: &str = "seestar.local";

/// Port of the Seestar's RTSP server.
pub const RTSP_PORT: u16 = 4554;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraTarget {
    /// Host pinged before recording.
    pub host: String,
    pub url: url::Url,
}

impl CameraTarget {
    /// An explicit `url` wins over `ip` for both the stream and the ping.
    pub fn new(ip: &str, url: Option<url::Url>) -> Result<Self, Error> {
        let url = match url {
            Some(url) => url,
            None => url::Url::parse(&format!("rtsp://{ip}:{RTSP_PORT}/stream"))?,
        };
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("camera URL {url} has no host"))?
            .to_owned();
        Ok(CameraTarget { host, url })
    }
}

/// Pings `host` once. A nonzero exit is reported as
/// [PipelineError::CameraUnreachable].
pub async fn check_reachable<R: ToolRunner>(
    host: &str,
    tools: &Tools,
    runner: &R,
) -> Result<(), PipelineError> {
    info!("Trying to ping camera: {host}");
    log_resolution(host).await;
    match runner.run(&tools.ping(host)).await {
        Ok(()) => {
            info!("Camera at {host} is reachable");
            Ok(())
        }
        Err(PipelineError::ToolFailed { .. }) => Err(PipelineError::CameraUnreachable {
            host: host.to_owned(),
        }),
        Err(e) => Err(e),
    }
}

/// Logs what `host` resolves to via unicast DNS. `.local` names usually
/// don't, so failures are left for ping to judge.
async fn log_resolution(host: &str) {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.parse::<IpAddr>().is_ok() {
        return;
    }
    let resolver = match hickory_resolver::TokioAsyncResolver::tokio_from_system_conf() {
        Ok(r) => r,
        Err(e) => {
            debug!("No system resolver configuration: {e}");
            return;
        }
    };
    match resolver.lookup_ip(host).await {
        Ok(ips) => {
            let addrs: Vec<IpAddr> = ips.iter().collect();
            info!("{host} resolves to {addrs:?}");
        }
        Err(e) => warn!("Unable to resolve {host} via DNS ({e}); leaving it to ping"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::fake::FakeRunner;
    use crate::tool::Stage;

    #[test]
    fn default_url_from_ip() {
        let t = CameraTarget::new("192.168.1.40", None).unwrap();
        assert_eq!(t.host, "192.168.1.40");
        assert_eq!(t.url.as_str(), "rtsp://192.168.1.40:4554/stream");
    }

    #[test]
    fn url_overrides_ip() {
        let url = "rtsp://cam.example:554/live".parse().unwrap();
        let t = CameraTarget::new(DEFAULT_HOST, Some(url)).unwrap();
        assert_eq!(t.host, "cam.example");
        assert_eq!(t.url.as_str(), "rtsp://cam.example:554/live");
    }

    #[test]
    fn url_without_host_is_rejected() {
        let url = "file:///tmp/stream".parse().unwrap();
        assert!(CameraTarget::new(DEFAULT_HOST, Some(url)).is_err());
    }

    #[tokio::test]
    async fn reachable_camera() {
        let runner = FakeRunner::default();
        check_reachable("192.0.2.7", &Tools::default(), &runner)
            .await
            .unwrap();
        assert_eq!(runner.command_lines(), ["ping -c 1 192.0.2.7"]);
    }

    #[tokio::test]
    async fn unreachable_camera() {
        let runner = FakeRunner::failing(Stage::Reachability);
        let err = check_reachable("192.0.2.7", &Tools::default(), &runner)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::CameraUnreachable { host } if host == "192.0.2.7"));
    }
}

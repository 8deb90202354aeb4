use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

use crate::didl;
use crate::error::{DlnaError, Result};
use crate::model::{Device, PushReport};
use crate::transport::description::DescriptionClient;
use crate::transport::soap::{AvTransport, AvTransportClient, SoapClient};

/// Knobs for the compatibility push ladder.
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Pause between a successful SetAVTransportURI and the Play that
    /// follows; renderers need a moment to arm the new URI.
    pub arm_delay: Duration,
    pub soap_timeout: Duration,
    /// Title embedded in the DIDL-Lite metadata; defaults to the last
    /// path segment of the media URL.
    pub title: Option<String>,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            arm_delay: Duration::from_millis(600),
            soap_timeout: Duration::from_secs(5),
            title: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UriSlot {
    Current,
    Next,
}

/// One rung of the ladder: how to hand the renderer the URI.
struct Strategy {
    stop_first: bool,
    with_metadata: bool,
    instance_id: u32,
    slot: UriSlot,
    arm_wait: bool,
}

/// Ordered fallback ladder, cheapest and most spec-compliant attempt
/// first. Renderers disagree on whether metadata may be empty, whether
/// the instance is 0 or 1, and whether a new URI needs a clean Stop, so
/// each rung relaxes one assumption. Tuned against real firmware; keep
/// the order.
const LADDER: [Strategy; 5] = [
    Strategy {
        stop_first: false,
        with_metadata: false,
        instance_id: 0,
        slot: UriSlot::Current,
        arm_wait: true,
    },
    Strategy {
        stop_first: false,
        with_metadata: true,
        instance_id: 0,
        slot: UriSlot::Current,
        arm_wait: true,
    },
    Strategy {
        stop_first: true,
        with_metadata: true,
        instance_id: 0,
        slot: UriSlot::Current,
        arm_wait: true,
    },
    Strategy {
        stop_first: false,
        with_metadata: true,
        instance_id: 1,
        slot: UriSlot::Current,
        arm_wait: true,
    },
    Strategy {
        stop_first: false,
        with_metadata: true,
        instance_id: 0,
        slot: UriSlot::Next,
        arm_wait: false,
    },
];

/// Drive a renderer to play `media_url`, working down the fallback
/// ladder until a Play succeeds. Every attempted action lands in the
/// report in order; the first successful Play ends the ladder.
pub fn push_and_play(
    transport: &dyn AvTransport,
    media_url: &str,
    mime: &str,
    options: &PushOptions,
) -> PushReport {
    let title = options
        .title
        .clone()
        .unwrap_or_else(|| title_from_url(media_url));
    let metadata = didl::didl_lite_for(media_url, &title, mime);
    let mut report = PushReport::default();

    // opener: renderers may error on Stop when already stopped, so its
    // outcome gates nothing
    report.record(transport.stop(0));

    for strategy in &LADDER {
        if strategy.stop_first {
            report.record(transport.stop(strategy.instance_id));
        }
        let meta = if strategy.with_metadata {
            metadata.as_str()
        } else {
            ""
        };
        let set = match strategy.slot {
            UriSlot::Current => transport.set_uri(strategy.instance_id, media_url, meta),
            UriSlot::Next => transport.set_next_uri(strategy.instance_id, media_url, meta),
        };
        if !report.record(set) {
            continue;
        }
        if strategy.arm_wait && !options.arm_delay.is_zero() {
            thread::sleep(options.arm_delay);
        }
        if report.record(transport.play(strategy.instance_id)) {
            report.mark_success();
            break;
        }
    }

    debug!("push report: {}", report.summary());
    report
}

/// Resolve the device's control binding if needed, then run the ladder.
/// Errors only when the device cannot be made playable at all; control
/// failures end up in the report instead.
pub fn play_on(
    device: &mut Device,
    media_url: &str,
    mime: &str,
    options: &PushOptions,
) -> Result<PushReport> {
    if !device.is_playable() {
        let resolver = DescriptionClient::new()?;
        if !resolver.resolve(device)? {
            return Err(DlnaError::NotPlayable(device.display_name().to_string()));
        }
    }
    let soap = SoapClient::new(options.soap_timeout)?;
    let transport = AvTransportClient::bind(&soap, device)?;
    Ok(push_and_play(&transport, media_url, mime, options))
}

/// A push running on its own thread, for callers that must not block
/// while the ladder works through a slow renderer. The outcome reaches
/// the callback once, when the ladder finishes.
pub struct PushSession {
    worker: JoinHandle<()>,
}

impl PushSession {
    pub fn start<F>(
        mut device: Device,
        media_url: String,
        mime: String,
        options: PushOptions,
        on_done: F,
    ) -> Self
    where
        F: FnOnce(Result<PushReport>) + Send + 'static,
    {
        let worker = thread::spawn(move || {
            on_done(play_on(&mut device, &media_url, &mime, &options));
        });
        Self { worker }
    }

    /// Block until the push finishes. The callback has already fired by
    /// the time this returns.
    pub fn join(self) {
        let _ = self.worker.join();
    }
}

fn title_from_url(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("Video")
        .to_string()
}

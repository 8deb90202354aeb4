/// A media renderer (or candidate renderer) seen on the local network.
///
/// Identity fields come from the discovery response that first produced
/// the device; the control binding is filled in later by the description
/// resolver, at most once.
#[derive(Debug, Clone, Default)]
pub struct Device {
    /// Unique Service Name; the deduplication key across responses.
    pub usn: String,
    /// `ST` header of a search response, or `NT` of a NOTIFY.
    pub search_target: String,
    /// `SERVER` banner, when the renderer sent one.
    pub server: Option<String>,
    /// URL of the UPnP device description document.
    pub location: Option<String>,
    /// `<friendlyName>` from the description document, resolved lazily.
    pub friendly_name: Option<String>,
    control_url: Option<String>,
    service_urn: Option<String>,
}

impl Device {
    pub fn new(usn: impl Into<String>) -> Self {
        Self {
            usn: usn.into(),
            ..Default::default()
        }
    }

    /// Absolute URL SOAP actions are POSTed to, once resolved.
    pub fn control_url(&self) -> Option<&str> {
        self.control_url.as_deref()
    }

    /// The renderer's exact AVTransport service type string, e.g.
    /// `urn:schemas-upnp-org:service:AVTransport:2`. Echoed verbatim in
    /// every SOAP call because renderers validate the version.
    pub fn service_urn(&self) -> Option<&str> {
        self.service_urn.as_deref()
    }

    /// Attach the AVTransport control binding. The first non-empty pair
    /// wins; binding an already-bound device is a no-op.
    pub fn bind_control(&mut self, control_url: String, service_urn: String) {
        if self.is_playable() || control_url.is_empty() || service_urn.is_empty() {
            return;
        }
        self.control_url = Some(control_url);
        self.service_urn = Some(service_urn);
    }

    /// A device can be driven iff its control endpoint is known.
    pub fn is_playable(&self) -> bool {
        self.control_url.is_some() && self.service_urn.is_some()
    }

    /// Best human-readable identity: friendly name, else server banner,
    /// else the USN.
    pub fn display_name(&self) -> &str {
        self.friendly_name
            .as_deref()
            .or(self.server.as_deref())
            .unwrap_or(&self.usn)
    }
}

/// Outcome of one AVTransport control action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub action: String,
    /// HTTP status, or -1 when the request never reached the renderer.
    pub http: i32,
    /// SOAP fault code or synthesized error; empty means no fault.
    pub fault: String,
}

impl StepResult {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.http) && self.fault.is_empty()
    }
}

/// Ordered trail of every control action attempted while pushing one
/// URL to a renderer. This is the only channel failure diagnostics
/// travel through; nothing below the orchestrator throws.
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    success: bool,
    steps: Vec<StepResult>,
}

impl PushReport {
    /// Append a step and report whether it succeeded.
    pub(crate) fn record(&mut self, step: StepResult) -> bool {
        let ok = step.ok();
        self.steps.push(step);
        ok
    }

    pub(crate) fn mark_success(&mut self) {
        self.success = true;
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    /// Human-readable rendering, one line per step.
    pub fn summary(&self) -> String {
        let mut out = String::from(if self.success { "SUCCESS" } else { "FAIL" });
        for step in &self.steps {
            out.push_str(&format!("\n- {} -> HTTP={}", step.action, step.http));
            if !step.fault.is_empty() {
                out.push_str(&format!(" SOAP={}", step.fault));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(action: &str, http: i32, fault: &str) -> StepResult {
        StepResult {
            action: action.to_string(),
            http,
            fault: fault.to_string(),
        }
    }

    #[test]
    fn test_step_result_ok_bounds() {
        assert!(step("Play", 200, "").ok());
        assert!(step("Play", 299, "").ok());
        assert!(!step("Play", 199, "").ok());
        assert!(!step("Play", 300, "").ok());
        assert!(!step("Play", -1, "connection refused").ok());
        assert!(!step("Play", 200, "s:Client").ok());
    }

    #[test]
    fn test_display_name_fallback_chain() {
        let mut device = Device::new("uuid:abc::urn:x");
        assert_eq!(device.display_name(), "uuid:abc::urn:x");

        device.server = Some("Linux/4.4 UPnP/1.0 BraviaTV/1.0".to_string());
        assert_eq!(device.display_name(), "Linux/4.4 UPnP/1.0 BraviaTV/1.0");

        device.friendly_name = Some("Living Room TV".to_string());
        assert_eq!(device.display_name(), "Living Room TV");
    }

    #[test]
    fn test_bind_control_is_idempotent() {
        let mut device = Device::new("uuid:abc");
        assert!(!device.is_playable());

        device.bind_control(
            "http://192.168.1.20:8080/AVTransport/control".to_string(),
            "urn:schemas-upnp-org:service:AVTransport:1".to_string(),
        );
        assert!(device.is_playable());

        device.bind_control(
            "http://192.168.1.99:9999/other".to_string(),
            "urn:schemas-upnp-org:service:AVTransport:3".to_string(),
        );
        assert_eq!(
            device.control_url(),
            Some("http://192.168.1.20:8080/AVTransport/control")
        );
        assert_eq!(
            device.service_urn(),
            Some("urn:schemas-upnp-org:service:AVTransport:1")
        );
    }

    #[test]
    fn test_bind_control_rejects_empty_fields() {
        let mut device = Device::new("uuid:abc");
        device.bind_control(String::new(), "urn:x".to_string());
        assert!(!device.is_playable());
        device.bind_control("http://host/control".to_string(), String::new());
        assert!(!device.is_playable());
    }

    #[test]
    fn test_report_success_and_summary() {
        let mut report = PushReport::default();
        assert!(report.record(step("Stop", 200, "")));
        assert!(!report.record(step("SetAVTransportURI", 500, "errorCode:718")));
        assert!(!report.success());

        report.record(step("Play", 200, ""));
        report.mark_success();
        assert!(report.success());

        let summary = report.summary();
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "SUCCESS");
        assert_eq!(lines[2], "- SetAVTransportURI -> HTTP=500 SOAP=errorCode:718");
    }
}

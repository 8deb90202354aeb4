use std::time::Duration;

use log::debug;

use crate::didl::xml_escape;
use crate::error::{DlnaError, Result};
use crate::model::{Device, StepResult};

/// Sentinel HTTP code recorded when the request never reached the
/// renderer (connect failure, timeout).
pub const HTTP_TRANSPORT_FAILED: i32 = -1;

/// Executes UPnP SOAP actions against a control URL. Outcomes of any
/// kind, including transport failures, are folded into `StepResult` so
/// a retry ladder can run to completion unconditionally.
pub struct SoapClient {
  http: reqwest::blocking::Client,
}

impl SoapClient {
  pub fn new(timeout: Duration) -> Result<Self> {
    let http = reqwest::blocking::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| DlnaError::Communication(e.to_string()))?;
    Ok(Self { http })
  }

  /// POST one action. `inner` is the `<u:Action ...>...</u:Action>`
  /// element; the service URN is echoed in the SOAPAction header, whose
  /// quotes are required by spec-compliant renderers.
  pub fn invoke(&self, control_url: &str, service_urn: &str, action: &str, inner: &str) -> StepResult {
    let envelope = build_envelope(inner);
    debug!("SOAP {} -> {}", action, control_url);

    let sent = self
      .http
      .post(control_url)
      .header("Content-Type", "text/xml; charset=\"utf-8\"")
      .header("SOAPAction", format!("\"{}#{}\"", service_urn, action))
      .body(envelope)
      .send();

    match sent {
      Ok(response) => {
        let http = i32::from(response.status().as_u16());
        if (200..300).contains(&http) {
          StepResult {
            action: action.to_string(),
            http,
            fault: String::new(),
          }
        } else {
          let body = response.text().unwrap_or_default();
          StepResult {
            action: action.to_string(),
            http,
            fault: extract_fault(&body, http),
          }
        }
      }
      Err(e) => StepResult {
        action: action.to_string(),
        http: HTTP_TRANSPORT_FAILED,
        fault: e.to_string(),
      },
    }
  }
}

fn build_envelope(inner: &str) -> String {
  format!(
    "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
      <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
      s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\
      <s:Body>{}</s:Body></s:Envelope>",
    inner
  )
}

/// Pull a fault out of an error response: `<faultcode>`, else
/// `<errorCode>`, else a string made from the HTTP status.
fn extract_fault(body: &str, http: i32) -> String {
  if let Some(code) = text_between(body, "<faultcode>", "</faultcode>") {
    return code;
  }
  if let Some(code) = text_between(body, "<errorCode>", "</errorCode>") {
    return format!("errorCode:{}", code);
  }
  format!("HTTP_{}", http)
}

fn text_between(xml: &str, open: &str, close: &str) -> Option<String> {
  let start = xml.find(open)? + open.len();
  let end = start + xml[start..].find(close)?;
  Some(xml[start..end].trim().to_string())
}

/// The AVTransport actions the play orchestrator drives. A trait so
/// tests can script renderer behavior without a network.
pub trait AvTransport {
  fn stop(&self, instance_id: u32) -> StepResult;
  fn set_uri(&self, instance_id: u32, uri: &str, metadata: &str) -> StepResult;
  fn set_next_uri(&self, instance_id: u32, uri: &str, metadata: &str) -> StepResult;
  fn play(&self, instance_id: u32) -> StepResult;
}

/// SOAP-backed AVTransport bound to one resolved device. The device's
/// service URN is reused verbatim in the envelope namespace and the
/// SOAPAction header; renderers validate the version.
pub struct AvTransportClient<'a> {
  soap: &'a SoapClient,
  control_url: String,
  service_urn: String,
}

impl<'a> AvTransportClient<'a> {
  pub fn bind(soap: &'a SoapClient, device: &Device) -> Result<Self> {
    match (device.control_url(), device.service_urn()) {
      (Some(control_url), Some(service_urn)) => Ok(Self {
        soap,
        control_url: control_url.to_string(),
        service_urn: service_urn.to_string(),
      }),
      _ => Err(DlnaError::NotPlayable(device.display_name().to_string())),
    }
  }

  fn action(&self, name: &str, args: &str) -> StepResult {
    let inner = format!(
      "<u:{} xmlns:u=\"{}\">{}</u:{}>",
      name, self.service_urn, args, name
    );
    self.soap.invoke(&self.control_url, &self.service_urn, name, &inner)
  }
}

impl AvTransport for AvTransportClient<'_> {
  fn stop(&self, instance_id: u32) -> StepResult {
    self.action("Stop", &format!("<InstanceID>{}</InstanceID>", instance_id))
  }

  fn set_uri(&self, instance_id: u32, uri: &str, metadata: &str) -> StepResult {
    // the metadata is itself an XML document; escaping it here is the
    // second, required encoding layer
    self.action(
      "SetAVTransportURI",
      &format!(
        "<InstanceID>{}</InstanceID><CurrentURI>{}</CurrentURI><CurrentURIMetaData>{}</CurrentURIMetaData>",
        instance_id,
        xml_escape(uri),
        xml_escape(metadata)
      ),
    )
  }

  fn set_next_uri(&self, instance_id: u32, uri: &str, metadata: &str) -> StepResult {
    self.action(
      "SetNextAVTransportURI",
      &format!(
        "<InstanceID>{}</InstanceID><NextURI>{}</NextURI><NextURIMetaData>{}</NextURIMetaData>",
        instance_id,
        xml_escape(uri),
        xml_escape(metadata)
      ),
    )
  }

  fn play(&self, instance_id: u32) -> StepResult {
    self.action(
      "Play",
      &format!("<InstanceID>{}</InstanceID><Speed>1</Speed>", instance_id),
    )
  }
}

use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;

use crate::error::{DlnaError, Result};
use crate::model::Device;

/// Version-agnostic needle; the matched service's exact type string is
/// what gets echoed back in SOAP calls.
pub const AV_TRANSPORT_PREFIX: &str = "urn:schemas-upnp-org:service:AVTransport:";

const DESCRIPTION_TIMEOUT: Duration = Duration::from_millis(2500);

// Some renderers filter on the user agent, so look like a browser.
const USER_AGENT: &str = "Mozilla/5.0 (compatible; dlnacast/0.1)";

/// UPnP device description root element.
#[derive(Debug, Deserialize)]
struct Root {
  device: DeviceDesc,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DeviceDesc {
  friendly_name: Option<String>,
  service_list: Option<ServiceList>,
  device_list: Option<DeviceList>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceList {
  #[serde(default, rename = "service")]
  service: Vec<ServiceDesc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServiceDesc {
  #[serde(rename = "serviceType")]
  service_type: String,
  #[serde(rename = "controlURL")]
  control_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct DeviceList {
  #[serde(default, rename = "device")]
  device: Vec<DeviceDesc>,
}

/// Fetches description documents and fills in AVTransport control
/// bindings.
pub struct DescriptionClient {
  http: Client,
}

impl DescriptionClient {
  pub fn new() -> Result<Self> {
    Self::with_timeout(DESCRIPTION_TIMEOUT)
  }

  pub fn with_timeout(timeout: Duration) -> Result<Self> {
    let http = Client::builder()
      .timeout(timeout)
      .user_agent(USER_AGENT)
      .build()
      .map_err(|e| DlnaError::Communication(e.to_string()))?;
    Ok(Self { http })
  }

  /// Resolve the device's AVTransport control binding from its
  /// description document. Returns `Ok(true)` when the device is
  /// playable on return (resolving an already-bound device is a no-op),
  /// `Ok(false)` when the description exposes no AVTransport service,
  /// and `Err` only for fetch failures.
  pub fn resolve(&self, device: &mut Device) -> Result<bool> {
    if device.is_playable() {
      return Ok(true);
    }
    let Some(location) = device.location.clone() else {
      return Ok(false);
    };
    let xml = self.fetch(&location)?;
    bind_from_description(device, &location, &xml)
  }

  fn fetch(&self, url: &str) -> Result<String> {
    let response = self
      .http
      .get(url)
      .send()
      .map_err(|e| DlnaError::Communication(e.to_string()))?;
    if !response.status().is_success() {
      return Err(DlnaError::Communication(format!(
        "GET {} returned {}",
        url,
        response.status()
      )));
    }
    response
      .text()
      .map_err(|e| DlnaError::Communication(e.to_string()))
  }
}

/// Apply a fetched description document to the device.
pub(crate) fn bind_from_description(
  device: &mut Device,
  location: &str,
  xml: &str,
) -> Result<bool> {
  if device.friendly_name.is_none() {
    device.friendly_name = scan_tag(xml, "friendlyName");
  }
  let Some((service_urn, control_url)) = extract_av_transport(xml) else {
    debug!("no AVTransport service in description at {}", location);
    return Ok(false);
  };
  let absolute = absolutize(location, &control_url)?;
  device.bind_control(absolute, service_urn);
  Ok(device.is_playable())
}

/// Locate the AVTransport service and return its exact
/// `(serviceType, controlURL)` pair. Tries a real XML parse first and
/// falls back to a tolerant substring scan for the vendor documents
/// that are not well-formed.
pub(crate) fn extract_av_transport(xml: &str) -> Option<(String, String)> {
  match quick_xml::de::from_str::<Root>(xml) {
    Ok(root) => find_in_device(&root.device).or_else(|| scan_av_transport(xml)),
    Err(e) => {
      debug!("description parse failed ({}), scanning instead", e);
      scan_av_transport(xml)
    }
  }
}

fn find_in_device(device: &DeviceDesc) -> Option<(String, String)> {
  if let Some(services) = &device.service_list {
    for service in &services.service {
      if service.service_type.starts_with(AV_TRANSPORT_PREFIX) && !service.control_url.is_empty()
      {
        return Some((service.service_type.clone(), service.control_url.clone()));
      }
    }
  }
  // TVs often nest the MediaRenderer as an embedded device
  if let Some(children) = &device.device_list {
    for child in &children.device {
      if let Some(found) = find_in_device(child) {
        return Some(found);
      }
    }
  }
  None
}

/// Substring fallback: find the needle, then the enclosing
/// `<serviceType>` and the nearest `<controlURL>` after it.
pub(crate) fn scan_av_transport(xml: &str) -> Option<(String, String)> {
  let pos = xml.find(AV_TRANSPORT_PREFIX)?;
  let st_open = xml[..pos].rfind("<serviceType>")? + "<serviceType>".len();
  let st_close = pos + xml[pos..].find("</serviceType>")?;
  let ctl_open = pos + xml[pos..].find("<controlURL>")? + "<controlURL>".len();
  let ctl_close = ctl_open + xml[ctl_open..].find("</controlURL>")?;
  let service_type = xml[st_open..st_close].trim();
  let control_url = xml[ctl_open..ctl_close].trim();
  if service_type.is_empty() || control_url.is_empty() {
    return None;
  }
  Some((service_type.to_string(), control_url.to_string()))
}

/// First `<tag>...</tag>` text in the document, whitespace-trimmed.
pub(crate) fn scan_tag(xml: &str, tag: &str) -> Option<String> {
  let open = format!("<{}>", tag);
  let close = format!("</{}>", tag);
  let start = xml.find(&open)? + open.len();
  let end = start + xml[start..].find(&close)?;
  let value = xml[start..end].trim();
  if value.is_empty() {
    None
  } else {
    Some(value.to_string())
  }
}

/// Best-effort friendly-name peek used during discovery. Failure is
/// tolerated; the device is simply reported without a name.
pub fn fetch_friendly_name(location: &str, timeout: Duration) -> Option<String> {
  let http = Client::builder()
    .timeout(timeout)
    .user_agent(USER_AGENT)
    .build()
    .ok()?;
  let xml = http.get(location).send().ok()?.text().ok()?;
  scan_tag(&xml, "friendlyName")
}

/// Resolve a control URL against the description document's own
/// scheme/host/port, never against the control point's origin.
pub(crate) fn absolutize(location: &str, control_url: &str) -> Result<String> {
  if control_url.starts_with("http://") || control_url.starts_with("https://") {
    return Ok(control_url.to_string());
  }
  let base = Url::parse(location)
    .map_err(|e| DlnaError::Parse(format!("bad location URL {}: {}", location, e)))?;
  let host = base
    .host_str()
    .ok_or_else(|| DlnaError::Parse(format!("location URL {} has no host", location)))?;
  let mut out = format!("{}://{}", base.scheme(), host);
  if let Some(port) = base.port() {
    out.push_str(&format!(":{}", port));
  }
  if !control_url.starts_with('/') {
    out.push('/');
  }
  out.push_str(control_url);
  Ok(out)
}

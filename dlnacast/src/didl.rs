/// Escape the five XML special characters in user-supplied text.
///
/// Applied once when building DIDL-Lite, and again when the DIDL-Lite
/// document is embedded as text inside a SOAP metadata element. Skipping
/// the second pass is a classic renderer-interop bug.
pub fn xml_escape(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&apos;"),
      _ => out.push(c),
    }
  }
  out
}

/// Minimal DIDL-Lite document describing a single video item.
///
/// Some renderers refuse SetAVTransportURI with empty metadata, so the
/// play ladder falls back to sending this.
pub fn didl_lite_for(media_url: &str, title: &str, mime: &str) -> String {
  format!(
    "<DIDL-Lite xmlns=\"urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/\" \
     xmlns:dc=\"http://purl.org/dc/elements/1.1/\" \
     xmlns:upnp=\"urn:schemas-upnp-org:metadata-1-0/upnp/\">\
     <item id=\"0\" parentID=\"-1\" restricted=\"1\">\
     <dc:title>{}</dc:title>\
     <res protocolInfo=\"http-get:*:{}:*\">{}</res>\
     <upnp:class>object.item.videoItem</upnp:class>\
     </item></DIDL-Lite>",
    xml_escape(title),
    xml_escape(mime),
    xml_escape(media_url)
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_xml_escape_all_five() {
    assert_eq!(
      xml_escape(r#"a&b<c>d"e'f"#),
      "a&amp;b&lt;c&gt;d&quot;e&apos;f"
    );
    assert_eq!(xml_escape("plain"), "plain");
  }

  #[test]
  fn test_didl_structure() {
    let didl = didl_lite_for("http://10.0.0.2/v.mp4", "Ocean", "video/mp4");
    assert!(didl.starts_with("<DIDL-Lite"));
    assert!(didl.contains("<dc:title>Ocean</dc:title>"));
    assert!(didl.contains("protocolInfo=\"http-get:*:video/mp4:*\""));
    assert!(didl.contains("<upnp:class>object.item.videoItem</upnp:class>"));
    assert!(didl.contains(">http://10.0.0.2/v.mp4</res>"));
  }

  #[test]
  fn test_escape_round_trip_through_conformant_parser() {
    let url = r#"http://10.0.0.2/v.mp4?a=1&b="x"<y>'z'"#;
    let didl = didl_lite_for(url, "clip & more", "video/mp4");

    // pull the <res> text back out and undo the entity encoding the way
    // a conformant XML parser would
    let start = didl.find(":*\">").unwrap() + 4;
    let res_text = &didl[start..didl.find("</res>").unwrap()];
    let decoded = quick_xml::escape::unescape(res_text).unwrap();
    assert_eq!(decoded, url);

    // the doubly-escaped form (as embedded in SOAP metadata) survives
    // two decode passes
    let embedded = xml_escape(&didl);
    let once = quick_xml::escape::unescape(&embedded).unwrap();
    assert_eq!(once, didl);
  }
}

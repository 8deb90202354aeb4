use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use dlnacast::transport::soap::HTTP_TRANSPORT_FAILED;
use dlnacast::{push_and_play, AvTransport, AvTransportClient, Device, PushOptions, SoapClient};

/// Serve every connection the same canned HTTP response, recording the
/// raw requests. Stands in for a renderer's control endpoint.
fn spawn_control_endpoint(status_line: &'static str, body: &'static str) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().expect("local addr");
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&requests);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut data = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        data.extend_from_slice(&buf[..n]);
                        if request_complete(&data) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            log.lock().unwrap().push(String::from_utf8_lossy(&data).into_owned());
            let response = format!(
                "{}\r\nContent-Type: text/xml; charset=\"utf-8\"\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    (addr, requests)
}

fn request_complete(data: &[u8]) -> bool {
    let text = String::from_utf8_lossy(data);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text
        .lines()
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);
    data.len() >= header_end + 4 + content_length
}

fn device_at(addr: SocketAddr, service_urn: &str) -> Device {
    let mut device = Device::new("uuid:test-renderer");
    device.bind_control(format!("http://{}/AVTransport/control", addr), service_urn.to_string());
    device
}

fn quick_options() -> PushOptions {
    PushOptions {
        arm_delay: Duration::ZERO,
        soap_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

const FAULT_BODY: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <s:Fault>
      <faultcode>s:Client</faultcode>
      <faultstring>UPnPError</faultstring>
      <detail><UPnPError><errorCode>501</errorCode></UPnPError></detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;

const OK_BODY: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:SetAVTransportURIResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1"/>
  </s:Body>
</s:Envelope>"#;

#[test]
fn test_compliant_endpoint_plays_on_the_first_rung() {
    let (addr, _requests) = spawn_control_endpoint("HTTP/1.1 200 OK", OK_BODY);
    let device = device_at(addr, "urn:schemas-upnp-org:service:AVTransport:1");

    let soap = SoapClient::new(Duration::from_secs(2)).unwrap();
    let transport = AvTransportClient::bind(&soap, &device).unwrap();
    let report = push_and_play(&transport, "http://10.0.0.9/v.mp4", "video/mp4", &quick_options());

    assert!(report.success());
    let actions: Vec<&str> = report.steps().iter().map(|s| s.action.as_str()).collect();
    assert_eq!(actions, ["Stop", "SetAVTransportURI", "Play"]);
    assert!(report.steps().iter().all(|s| s.http == 200 && s.fault.is_empty()));
}

#[test]
fn test_always_faulting_endpoint_yields_the_full_trail() {
    let (addr, _requests) = spawn_control_endpoint("HTTP/1.1 500 Internal Server Error", FAULT_BODY);
    let device = device_at(addr, "urn:schemas-upnp-org:service:AVTransport:1");

    let soap = SoapClient::new(Duration::from_secs(2)).unwrap();
    let transport = AvTransportClient::bind(&soap, &device).unwrap();
    let report = push_and_play(&transport, "http://10.0.0.9/v.mp4", "video/mp4", &quick_options());

    assert!(!report.success());
    // opener Stop, four SetAVTransportURI rungs, one explicit Stop, SetNext
    assert_eq!(report.steps().len(), 7);
    for step in report.steps() {
        assert_eq!(step.http, 500);
        assert_eq!(step.fault, "s:Client");
    }
}

#[test]
fn test_service_urn_version_echoed_verbatim() {
    let (addr, requests) = spawn_control_endpoint("HTTP/1.1 200 OK", OK_BODY);
    let device = device_at(addr, "urn:schemas-upnp-org:service:AVTransport:2");

    let soap = SoapClient::new(Duration::from_secs(2)).unwrap();
    let transport = AvTransportClient::bind(&soap, &device).unwrap();
    let report = push_and_play(&transport, "http://10.0.0.9/v.mp4", "video/mp4", &quick_options());
    assert!(report.success());

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 3);
    for request in requests.iter() {
        assert!(request.contains("soapaction: \"urn:schemas-upnp-org:service:AVTransport:2#")
            || request.contains("SOAPAction: \"urn:schemas-upnp-org:service:AVTransport:2#"));
        assert!(request.contains("xmlns:u=\"urn:schemas-upnp-org:service:AVTransport:2\""));
        assert!(!request.contains("AVTransport:1"));
        assert!(request.contains("text/xml; charset=\"utf-8\""));
    }
}

#[test]
fn test_media_url_is_escaped_on_the_wire() {
    let (addr, requests) = spawn_control_endpoint("HTTP/1.1 200 OK", OK_BODY);
    let device = device_at(addr, "urn:schemas-upnp-org:service:AVTransport:1");

    let soap = SoapClient::new(Duration::from_secs(2)).unwrap();
    let transport = AvTransportClient::bind(&soap, &device).unwrap();
    let url = "http://10.0.0.9/v.mp4?a=1&b=2";
    let report = push_and_play(&transport, url, "video/mp4", &quick_options());
    assert!(report.success());

    let requests = requests.lock().unwrap();
    let set_request = requests
        .iter()
        .find(|r| r.contains("SetAVTransportURI"))
        .expect("a SetAVTransportURI request");
    assert!(set_request.contains("<CurrentURI>http://10.0.0.9/v.mp4?a=1&amp;b=2</CurrentURI>"));
    assert!(!set_request.contains("a=1&b=2"));
}

#[test]
fn test_connection_refused_becomes_a_step_result() {
    // grab a port that nothing listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let device = device_at(addr, "urn:schemas-upnp-org:service:AVTransport:1");

    let soap = SoapClient::new(Duration::from_secs(1)).unwrap();
    let transport = AvTransportClient::bind(&soap, &device).unwrap();
    let step = transport.play(0);

    assert_eq!(step.action, "Play");
    assert_eq!(step.http, HTTP_TRANSPORT_FAILED);
    assert!(!step.fault.is_empty());
    assert!(!step.ok());
}

use std::env;
use std::io::{self, BufRead, Write};
use std::net::IpAddr;
use std::process::ExitCode;
use std::time::Duration;

use log::{warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use dlnacast::{
    play_on, CancelToken, DescriptionClient, DescriptionProbe, Device, DiscoveryEvent,
    DiscoveryOptions, DiscoverySession, DiscoverySource, PushOptions, UnicastScan,
};

struct Args {
    media_url: String,
    mime: Option<String>,
    ip: Option<IpAddr>,
    window: Duration,
    verbose: bool,
}

fn main() -> ExitCode {
    let Some(args) = parse_args() else {
        eprintln!("usage: cli <media-url> [--mime <type>] [--ip <renderer-ip>] [--window <seconds>] [-v]");
        return ExitCode::from(2);
    };

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto).ok();

    let devices = match args.ip {
        Some(ip) => scan_ip(ip),
        None => scan_multicast(args.window),
    };

    let playable = resolve_all(devices);
    if playable.is_empty() {
        eprintln!("no playable renderers found");
        return ExitCode::FAILURE;
    }

    println!("\nPlayable renderers:");
    for (index, device) in playable.iter().enumerate() {
        println!("  [{}] {}", index, device.display_name());
    }

    let Some(mut device) = pick(playable) else {
        return ExitCode::FAILURE;
    };

    let mime = args.mime.clone().unwrap_or_else(|| guess_mime(&args.media_url));
    println!(
        "Pushing {} ({}) to {} ...",
        args.media_url,
        mime,
        device.display_name()
    );

    match play_on(&mut device, &args.media_url, &mime, &PushOptions::default()) {
        Ok(report) => {
            println!("{}", report.summary());
            if report.success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("push failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn parse_args() -> Option<Args> {
    let mut media_url = None;
    let mut mime = None;
    let mut ip = None;
    let mut window = Duration::from_secs(25);
    let mut verbose = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--mime" => mime = Some(args.next()?),
            "--ip" => ip = Some(args.next()?.parse().ok()?),
            "--window" => window = Duration::from_secs(args.next()?.parse().ok()?),
            "-v" | "--verbose" => verbose = true,
            _ if media_url.is_none() => media_url = Some(arg),
            _ => return None,
        }
    }

    Some(Args {
        media_url: media_url?,
        mime,
        ip,
        window,
        verbose,
    })
}

/// Multicast scan, streaming devices to the terminal as they turn up.
fn scan_multicast(window: Duration) -> Vec<Device> {
    println!("Scanning for renderers ({} s window)...", window.as_secs());
    let session = DiscoverySession::start(
        DiscoveryOptions {
            window,
            ..Default::default()
        },
        |event| {
            if let DiscoveryEvent::Found(device) = event {
                println!("  found: {}", device.display_name());
            }
        },
    );
    session.join()
}

/// Known-IP fallbacks, escalating: unicast SSDP, then brute-force
/// description probing for networks that drop SSDP entirely.
fn scan_ip(ip: IpAddr) -> Vec<Device> {
    println!("Probing {} directly...", ip);
    let sources: Vec<Box<dyn DiscoverySource>> = vec![
        Box::new(UnicastScan::new(ip, Duration::from_secs(3))),
        Box::new(DescriptionProbe::new(ip)),
    ];

    let cancel = CancelToken::new();
    for source in sources {
        match source.discover(&cancel, &mut |device| {
            println!("  found: {}", device.display_name());
        }) {
            Ok(devices) if !devices.is_empty() => return devices,
            Ok(_) => {}
            Err(e) => warn!("probe failed: {}", e),
        }
    }
    Vec::new()
}

/// Fill in control bindings and keep only the devices that can be
/// driven.
fn resolve_all(devices: Vec<Device>) -> Vec<Device> {
    let resolver = match DescriptionClient::new() {
        Ok(resolver) => resolver,
        Err(e) => {
            warn!("resolver unavailable: {}", e);
            return Vec::new();
        }
    };

    let mut playable = Vec::new();
    for mut device in devices {
        match resolver.resolve(&mut device) {
            Ok(true) => playable.push(device),
            Ok(false) => warn!("{}: no AVTransport service", device.display_name()),
            Err(e) => warn!("{}: description fetch failed: {}", device.display_name(), e),
        }
    }
    playable
}

fn pick(mut playable: Vec<Device>) -> Option<Device> {
    if playable.len() == 1 {
        return Some(playable.remove(0));
    }

    print!("Cast to [0-{}]: ", playable.len() - 1);
    io::stdout().flush().ok();

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok()?;
    let index: usize = line.trim().parse().ok()?;
    if index >= playable.len() {
        eprintln!("no such renderer");
        return None;
    }
    Some(playable.remove(index))
}

fn guess_mime(url: &str) -> String {
    let lower = url.to_lowercase();
    let mime = if lower.contains(".m3u8") {
        "application/vnd.apple.mpegurl"
    } else if lower.contains(".mpd") {
        "application/dash+xml"
    } else if lower.contains(".mp4") {
        "video/mp4"
    } else if lower.contains(".webm") {
        "video/webm"
    } else {
        "video/*"
    };
    mime.to_string()
}

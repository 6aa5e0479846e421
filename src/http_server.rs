use crate::dispatcher::{parse_request, Command, NodeHandle, Reply, Snapshot};
use crate::error::{NodeError, Result};
use crate::types::{Mode, RecordingState};
use log::{error, info, warn};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

/// Largest request body accepted.
const MAX_BODY: usize = 4096;

/// Minimal HTTP/1.0 front end.
///
/// One short-lived thread per connection: parse the request, turn it into a
/// [`Command`], hand it to the control loop and write back the JSON reply.
pub struct HttpServer {
    addr: String,
    node: NodeHandle,
}

/// Parsed HTTP request line plus body.
struct HttpRequest {
    method: String,
    path: String,
    body: String,
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut method = String::new();
    let mut path = String::from("/");
    let mut content_length = 0usize;
    let mut first = true;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if first {
            // "POST /tone HTTP/1.1"
            let mut parts = trimmed.split_whitespace();
            method = parts.next().unwrap_or_default().to_string();
            if let Some(p) = parts.next() {
                path = p.to_string();
            }
            first = false;
            continue;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0u8; content_length.min(MAX_BODY)];
    reader.read_exact(&mut body)?;
    Ok(HttpRequest {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

fn respond(stream: &mut TcpStream, code: u16, content_type: &str, body: &[u8]) {
    let header = format!(
        "HTTP/1.0 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Cache-Control: no-cache\r\n\
         \r\n",
        code,
        reason(code),
        content_type,
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(body);
}

fn respond_error(stream: &mut TcpStream, err: &NodeError) {
    let code = err.status_code();
    let body = serde_json::json!({ "status": "error", "error": err.to_string() }).to_string();
    respond(stream, code, "application/json", body.as_bytes());
}

/// The browser status page, refreshed every 3 s.
pub fn render_status_page(s: &Snapshot) -> String {
    let mut html = String::new();
    html.push_str("<html><head><title>Light Orchestra</title></head>");
    html.push_str("<body style='font-family: Arial; padding: 20px;'>");
    html.push_str("<h1>Light Orchestra</h1>");
    html.push_str(&format!("<p><b>Device:</b> {}</p>", escape(&s.device_id)));
    html.push_str(&format!("<p><b>Mode:</b> {}</p>", escape(s.mode.name())));
    let calib = if s.calibrating {
        "In progress"
    } else if s.calibrated {
        "Yes"
    } else {
        "No"
    };
    html.push_str(&format!("<p><b>Calibrated:</b> {}</p><hr>", calib));
    html.push_str(&format!("<p><b>Light Level:</b> {}</p>", s.raw));
    html.push_str(&format!(
        "<p><b>Normalized:</b> {}%</p>",
        (s.norm * 100.0) as u32
    ));
    html.push_str(&format!("<p><b>Range:</b> {} - {}</p><hr>", s.floor, s.ceiling));
    html.push_str("<h3>Controls</h3>");
    html.push_str("<button onclick=\"fetch('/calibrate', {method:'POST'})\">Calibrate</button>");
    html.push_str("<button onclick=\"fetch('/post_mode', {method:'POST', body:JSON.stringify({mode:'Live Play'})})\">Live Play</button>");
    html.push_str("<button onclick=\"fetch('/post_mode', {method:'POST', body:JSON.stringify({mode:'Record &amp; Play'})})\">Record Mode</button>");
    if s.mode == Mode::RecordAndPlay {
        html.push_str(&format!(
            "<p><b>Recording:</b> {}</p>",
            s.state == RecordingState::Recording
        ));
    }
    if s.melody_length > 0 {
        html.push_str(&format!(
            "<p><b>Melody Length:</b> {} events</p>",
            s.melody_length
        ));
    }
    html.push_str("<script>setTimeout(function(){location.reload()}, 3000)</script>");
    html.push_str("</body></html>");
    html
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn serve(stream: &mut TcpStream, node: &NodeHandle) {
    let req = match read_request(stream) {
        Ok(r) => r,
        Err(e) => {
            warn!("Request parse error: {}", e);
            return;
        }
    };
    info!("{} {}", req.method, req.path);

    let result = parse_request(&req.method, &req.path, &req.body)
        .and_then(|command: Command| node.call(command));
    match result {
        Ok(Reply::Snapshot(s)) => {
            respond(stream, 200, "text/html; charset=utf-8", render_status_page(&s).as_bytes())
        }
        Ok(reply) => match serde_json::to_vec(&reply) {
            Ok(body) => respond(stream, 200, "application/json", &body),
            Err(e) => {
                error!("JSON serialize error: {}", e);
                respond_error(stream, &NodeError::Io(std::io::Error::other(e)));
            }
        },
        Err(e) => {
            warn!("{} {} rejected: {}", req.method, req.path, e);
            respond_error(stream, &e);
        }
    }
}

impl HttpServer {
    pub fn new(addr: String, node: NodeHandle) -> Self {
        Self { addr, node }
    }

    /// Accept connections forever. Returns only if the bind fails.
    pub fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)?;
        info!("HTTP API listening on http://{}", self.addr);

        for stream in listener.incoming() {
            match stream {
                Ok(mut stream) => {
                    let node = self.node.clone();
                    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
                    let spawned = thread::Builder::new()
                        .name("http-conn".into())
                        .spawn(move || serve(&mut stream, &node));
                    if let Err(e) = spawned {
                        error!("Failed to spawn connection thread: {}", e);
                    }
                }
                Err(e) => warn!("TCP accept error: {}", e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            device_id: "pico<1>".into(),
            mode: Mode::RecordAndPlay,
            state: RecordingState::Recording,
            calibrated: true,
            calibrating: false,
            raw: 31000,
            norm: 0.421,
            floor: 2000,
            ceiling: 60000,
            melody_length: 7,
        }
    }

    #[test]
    fn test_status_page_contents() {
        let html = render_status_page(&snapshot());
        assert!(html.contains("pico&lt;1&gt;"));
        assert!(html.contains("Record &amp; Play"));
        assert!(html.contains("<b>Normalized:</b> 42%"));
        assert!(html.contains("<b>Recording:</b> true"));
        assert!(html.contains("7 events"));
    }

    #[test]
    fn test_live_mode_page_hides_recording() {
        let mut s = snapshot();
        s.mode = Mode::LivePlay;
        s.melody_length = 0;
        let html = render_status_page(&s);
        assert!(!html.contains("<b>Recording:</b>"));
        assert!(!html.contains("Melody Length"));
    }
}

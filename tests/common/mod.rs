#![allow(dead_code)]

use flavorscan::scanner::{OutputRouting, ProcessRunner};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use tar::{Builder, EntryType, Header};

/// A request as seen by [`FixtureServer`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub headers: HashMap<String, String>,
}

struct Route {
    status: u16,
    body: Vec<u8>,
}

/// Minimal HTTP/1.1 server answering canned responses by request path.
/// Unknown paths get a 404.
pub struct FixtureServer {
    addr: String,
    routes: Arc<Mutex<HashMap<String, Route>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl FixtureServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let routes: Arc<Mutex<HashMap<String, Route>>> = Arc::default();
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();

        let (thread_routes, thread_requests) = (routes.clone(), requests.clone());
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let _ = serve(stream, &thread_routes, &thread_requests);
            }
        });

        Self {
            addr,
            routes,
            requests,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn route(&self, path: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route {
                status,
                body: body.into(),
            },
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn serve(
    stream: TcpStream,
    routes: &Mutex<HashMap<String, Route>>,
    requests: &Mutex<Vec<RecordedRequest>>,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }
    requests.lock().unwrap().push(RecordedRequest {
        path: path.clone(),
        headers,
    });

    let (status, body) = match routes.lock().unwrap().get(&path) {
        Some(route) => (route.status, route.body.clone()),
        None => (404, b"not found".to_vec()),
    };

    let mut stream = stream;
    write!(
        stream,
        "HTTP/1.1 {} Fixture\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    )?;
    stream.write_all(&body)?;
    stream.flush()
}

/// A tar archive holding `entries`.
pub fn tar_bundle(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// An SBOM naming the image it was generated from.
pub fn sbom(user_input: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "source": { "metadata": { "userInput": user_input } },
        "artifacts": []
    }))
    .unwrap()
}

/// A CycloneDX scan report.
pub fn report(name: &str, version: &str, vulns: &[(&str, &str, &str)]) -> Value {
    let vulnerabilities: Vec<Value> = vulns
        .iter()
        .map(|(id, package, severity)| {
            json!({
                "id": id,
                "source": { "name": "nvd", "url": format!("https://nvd.nist.gov/vuln/detail/{}", id) },
                "ratings": [{ "severity": severity }],
                "affects": [{ "ref": package }]
            })
        })
        .collect();
    json!({
        "bomFormat": "CycloneDX",
        "metadata": { "component": { "name": name, "version": version } },
        "vulnerabilities": vulnerabilities
    })
}

pub fn write_report(path: &Path, report: &Value) {
    fs::write(path, serde_json::to_vec_pretty(report).unwrap()).unwrap();
}

/// Stand-in scanner: writes the report whose key is contained in the scan
/// target, and records every scan target it was given.
#[derive(Default)]
pub struct FakeScanner {
    reports: Vec<(String, Value)>,
    pub targets: RefCell<Vec<String>>,
}

impl FakeScanner {
    pub fn with_report(mut self, target_contains: &str, report: Value) -> Self {
        self.reports.push((target_contains.to_string(), report));
        self
    }

    fn report_for(&self, target: &str) -> Option<&Value> {
        let sbom_input = target
            .strip_prefix("sbom:")
            .and_then(|path| fs::read(path).ok())
            .and_then(|data| serde_json::from_slice::<Value>(&data).ok())
            .and_then(|doc| {
                doc.pointer("/source/metadata/userInput")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        let subject = sbom_input.as_deref().unwrap_or(target);
        self.reports
            .iter()
            .find(|(key, _)| subject.contains(key.as_str()))
            .map(|(_, report)| report)
    }
}

impl ProcessRunner for FakeScanner {
    fn run(&self, _program: &str, args: &[String], _routing: OutputRouting) -> io::Result<bool> {
        let Some(file_index) = args.iter().position(|a| a == "--file") else {
            return Ok(true);
        };
        let output = PathBuf::from(&args[file_index + 1]);
        let target = args.last().cloned().unwrap_or_default();
        self.targets.borrow_mut().push(target.clone());

        match self.report_for(&target) {
            Some(report) => {
                write_report(&output, report);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn combined_output(&self, _program: &str, _args: &[String]) -> io::Result<Vec<u8>> {
        Ok(b"Status: valid".to_vec())
    }
}

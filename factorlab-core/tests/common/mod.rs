//! Scripted in-memory HTTP server shared by the integration tests.

#![allow(dead_code)]

use factorlab_core::data::{
    CacheStore, Connector, HttpClient, HttpConfig, RemoteBody, RemoteMeta, Transport, Validators,
};
use factorlab_core::{DataError, DataResult};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
struct Route {
    body: Vec<u8>,
    validators: Validators,
    status: u16,
}

#[derive(Default)]
struct ServerState {
    routes: Mutex<HashMap<String, Route>>,
    heads: AtomicUsize,
    gets: AtomicUsize,
    sessions: AtomicUsize,
}

/// Serves canned bodies by URL and counts every request it sees.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<ServerState>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url` with an optional ETag.
    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>, etag: Option<&str>) {
        self.serve_with_validators(
            url,
            body,
            Validators {
                etag: etag.map(str::to_string),
                last_modified: None,
            },
        );
    }

    /// Serve `body` at `url` with a Last-Modified header and an optional ETag.
    pub fn serve_with_last_modified(
        &self,
        url: &str,
        body: impl Into<Vec<u8>>,
        last_modified: &str,
        etag: Option<&str>,
    ) {
        self.serve_with_validators(
            url,
            body,
            Validators {
                etag: etag.map(str::to_string),
                last_modified: Some(last_modified.to_string()),
            },
        );
    }

    fn serve_with_validators(&self, url: &str, body: impl Into<Vec<u8>>, validators: Validators) {
        self.state.routes.lock().unwrap().insert(
            url.to_string(),
            Route {
                body: body.into(),
                validators,
                status: 200,
            },
        );
    }

    /// Answer every request for `url` with `status`.
    pub fn reject(&self, url: &str, status: u16) {
        self.state.routes.lock().unwrap().insert(
            url.to_string(),
            Route {
                body: Vec::new(),
                validators: Validators::default(),
                status,
            },
        );
    }

    /// Forget `url`: requests fail as unreachable.
    pub fn unplug(&self, url: &str) {
        self.state.routes.lock().unwrap().remove(url);
    }

    pub fn heads(&self) -> usize {
        self.state.heads.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.state.gets.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> usize {
        self.state.sessions.load(Ordering::SeqCst)
    }

    pub fn client(&self, cache_dir: &Path) -> HttpClient {
        HttpClient::with_connector(
            HttpConfig::default(),
            CacheStore::new(cache_dir),
            Arc::new(self.clone()),
        )
    }

    fn route(&self, url: &str) -> DataResult<Route> {
        let route = self
            .state
            .routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| DataError::Network {
                url: url.to_string(),
                reason: "connection refused".into(),
            })?;
        if route.status != 200 {
            return Err(DataError::RemoteRejected {
                url: url.to_string(),
                status: route.status,
            });
        }
        Ok(route)
    }
}

impl Connector for MockServer {
    fn connect(&self, _config: &HttpConfig) -> DataResult<Box<dyn Transport>> {
        self.state.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.clone()))
    }
}

impl Transport for MockServer {
    fn probe(&self, url: &str) -> DataResult<RemoteMeta> {
        self.state.heads.fetch_add(1, Ordering::SeqCst);
        let route = self.route(url)?;
        Ok(RemoteMeta {
            validators: route.validators,
            content_length: Some(route.body.len() as u64),
        })
    }

    fn fetch(&self, url: &str) -> DataResult<RemoteBody> {
        self.state.gets.fetch_add(1, Ordering::SeqCst);
        let route = self.route(url)?;
        Ok(RemoteBody {
            meta: RemoteMeta {
                validators: route.validators,
                content_length: Some(route.body.len() as u64),
            },
            reader: Box::new(Cursor::new(route.body)),
        })
    }
}

pub const FF3_MONTHLY_URL: &str =
    "https://mba.tuck.dartmouth.edu/pages/faculty/ken.french/ftp/F-F_Research_Data_Factors_CSV.zip";
pub const Q5_MONTHLY_URL: &str =
    "https://global-q.org/uploads/1/2/2/6/122679606/q5_factors_monthly_2024.csv";

/// A zip archive holding one text member.
pub fn zipped(name: &str, text: &str) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.start_file(name, options).unwrap();
        writer.write_all(text.as_bytes()).unwrap();
        writer.finish().unwrap();
    }
    buf.into_inner()
}

/// Fama-French 3-factor monthly file, July 1926 to December 1926, rows out of order.
pub fn ff3_monthly() -> Vec<u8> {
    zipped(
        "F-F_Research_Data_Factors.CSV",
        "This file was created by CMPT_ME_BEME_RETS using the 202401 CRSP database.\n\
         The 1-month TBill return is from Ibbotson and Associates, Inc.\n\
         \n\
         ,Mkt-RF,SMB,HML,RF\n\
         192607,    2.96,   -2.56,   -2.43,    0.22\n\
         192609,    0.36,   -1.40,    0.13,    0.23\n\
         192608,    2.64,   -1.17,    3.82,    0.25\n\
         192610,   -3.24,   -0.09,    0.73,    0.32\n\
         192611,    2.53,   -0.10,   -0.51,    0.31\n\
         192612,    2.62,   -0.03,  -99.99,    0.28\n\
         \n\
          Annual Factors: January-December \n\
         ,Mkt-RF,SMB,HML,RF\n\
         1927,   29.47,   -2.46,   -3.75,    3.12\n\
         \n\
         Copyright 2024 Eugene F. Fama and Kenneth R. French\n",
    )
}

/// q5 monthly file overlapping the Fama-French file from September 1926.
pub fn q5_monthly() -> Vec<u8> {
    b"year,month,R_F,R_MKT,R_ME,R_IA,R_ROE,R_EG\n\
      1926,9,0.23,0.36,1.1,0.2,0.3,0.4\n\
      1926,10,0.32,-3.24,1.2,0.2,0.3,0.4\n\
      1926,11,0.31,2.53,1.3,0.2,0.3,0.4\n\
      1926,12,0.28,2.62,1.4,0.2,0.3,0.4\n\
      1927,1,0.25,0.10,1.5,0.2,0.3,0.4\n"
        .to_vec()
}

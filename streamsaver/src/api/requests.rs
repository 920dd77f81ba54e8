//! Store of URL requests received through the API.

use chrono::{DateTime, Local};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

use crate::utils::hash::key_from_str;
use crate::utils::time::serialize_seconds;
use crate::{Error, Result};

/// A received download request.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "ReceiveTime", serialize_with = "serialize_seconds")]
    pub receive_time: DateTime<Local>,
    #[serde(rename = "Status")]
    pub status: String,
}

/// Requests keyed by the hash of their URL.
#[derive(Debug, Default)]
pub struct RequestStore {
    requests: DashMap<String, Request>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `url` and returns its job key.
    pub fn insert(&self, url: &str) -> Result<String> {
        if url.is_empty() {
            return Err(Error::EmptyRequest);
        }

        let key = key_from_str(url);
        match self.requests.entry(key.clone()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists),
            Entry::Vacant(entry) => {
                entry.insert(Request {
                    url: url.to_string(),
                    receive_time: Local::now(),
                    status: String::new(),
                });
                Ok(key)
            }
        }
    }

    pub fn retrieve(&self, key: &str) -> Result<Request> {
        self.requests
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found("Request", key))
    }

    pub fn remove(&self, key: &str) -> Option<Request> {
        self.requests.remove(key).map(|(_, request)| request)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

//! Scripted [`Transport`] for exercising the client and the pipeline without
//! network access.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;
use reqwest::Method;

use crate::client::{Transport, TransportError};

#[derive(Debug, Clone)]
pub enum Reply {
    Body(String),
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
}

/// Serves queued replies per URL, in order. A URL with no reply left answers
/// with a transport error.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply<S: Into<String>>(self, url: S, reply: Reply) -> Self {
        self.replies
            .lock()
            .expect("scripted replies")
            .entry(url.into())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn body<S: Into<String>, B: Into<String>>(self, url: S, body: B) -> Self {
        self.reply(url, Reply::Body(body.into()))
    }

    pub fn fail<S: Into<String>>(self, url: S, status: u16, times: usize) -> Self {
        let url = url.into();
        (0..times).fold(self, |transport, _| {
            transport.reply(url.clone(), Reply::Status(status))
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("scripted calls").clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls().iter().filter(|call| call.url == url).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<String, TransportError> {
        self.calls.lock().expect("scripted calls").push(Call {
            method,
            url: url.to_owned(),
            params: params
                .iter()
                .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
                .collect(),
        });

        let reply = self
            .replies
            .lock()
            .expect("scripted replies")
            .get_mut(url)
            .and_then(VecDeque::pop_front);

        match reply {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Status(status)) => Err(TransportError::Status {
                status,
                url: url.to_owned(),
                body: None,
            }),
            None => Err(TransportError::Other(format!("no scripted reply for {url}"))),
        }
    }
}

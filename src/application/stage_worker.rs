// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A stage that performs blocking I/O on its own thread.
//!
//! The runner talks to it strictly request by request. While a request is
//! in flight the runner blocks on the reply *or* on cancellation, whichever
//! comes first, so a slow database round-trip or part upload never delays a
//! cancel.

use crate::application::cancellation::CancellationToken;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::debug;
use std::io;
use std::thread::{self, JoinHandle};

/// Why a request produced no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    Cancelled,
    /// The worker thread is gone (it panicked).
    Disconnected,
}

pub struct StageWorker<Req, Resp> {
    name: String,
    requests: Option<Sender<Req>>,
    replies: Receiver<Resp>,
    handle: Option<JoinHandle<()>>,
}

impl<Req, Resp> StageWorker<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Moves `handler` (and the stage it owns) onto a new thread.
    pub fn spawn<F>(name: &str, mut handler: F) -> io::Result<Self>
    where
        F: FnMut(Req) -> Resp + Send + 'static,
    {
        // At most one abandoned request plus the final one are ever queued.
        let (req_tx, req_rx) = bounded::<Req>(2);
        let (resp_tx, resp_rx) = bounded::<Resp>(2);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for req in req_rx {
                    if resp_tx.send(handler(req)).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            name: name.to_string(),
            requests: Some(req_tx),
            replies: resp_rx,
            handle: Some(handle),
        })
    }

    /// Sends `req` and waits for its reply or for cancellation.
    pub fn call(&self, req: Req, cancel: &CancellationToken) -> Result<Resp, CallError> {
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        let requests = self.requests.as_ref().ok_or(CallError::Disconnected)?;
        requests.send(req).map_err(|_| CallError::Disconnected)?;

        select! {
            recv(self.replies) -> reply => reply.map_err(|_| CallError::Disconnected),
            recv(cancel.signal()) -> _ => Err(CallError::Cancelled),
        }
    }

    /// Sends a last request, waits for everything outstanding (including a
    /// request abandoned by cancellation) and stops the thread.
    pub fn finish(mut self, req: Req) -> Result<Resp, CallError> {
        let sent = match self.requests.take() {
            Some(requests) => requests.send(req).is_ok(),
            None => false,
        };
        let joined = self.join();
        if !sent || !joined {
            return Err(CallError::Disconnected);
        }
        self.replies.try_iter().last().ok_or(CallError::Disconnected)
    }

    fn join(&mut self) -> bool {
        self.requests.take();
        match self.handle.take() {
            Some(handle) => {
                let ok = handle.join().is_ok();
                debug!("Stage worker '{}' stopped", self.name);
                ok
            }
            None => true,
        }
    }
}

impl<Req, Resp> Drop for StageWorker<Req, Resp> {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

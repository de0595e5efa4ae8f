use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived, ResourceType,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::signals::network;

/// Collects media URLs seen on the wire for one page load. Created before
/// navigation, drained once by `finish`.
pub struct NetworkObserver {
    hits: Arc<Mutex<Vec<String>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl NetworkObserver {
    /// Subscribe to responses and outgoing requests. The Network domain must
    /// already be enabled on `page`.
    pub async fn start(page: &Page) -> Result<Self> {
        let hits: Arc<Mutex<Vec<String>>> = Arc::default();

        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .context("Failed to subscribe to responses")?;
        let mut requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .context("Failed to subscribe to requests")?;

        let sink = Arc::clone(&hits);
        let on_response = tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                let res = &event.response;
                if network::is_media_response(&res.url, &res.mime_type) {
                    record(&sink, &res.url);
                }
            }
        });

        let sink = Arc::clone(&hits);
        let on_request = tokio::spawn(async move {
            while let Some(event) = requests.next().await {
                let is_image = matches!(event.r#type, Some(ResourceType::Image));
                if network::is_image_request(&event.request.url, is_image) {
                    record(&sink, &event.request.url);
                }
            }
        });

        Ok(Self {
            hits,
            tasks: vec![on_response, on_request],
        })
    }

    /// Stop listening and hand back everything observed, in arrival order.
    pub fn finish(mut self) -> Vec<String> {
        self.stop();
        self.hits
            .lock()
            .map(|mut hits| std::mem::take(&mut *hits))
            .unwrap_or_default()
    }

    fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for NetworkObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn record(sink: &Mutex<Vec<String>>, url: &str) {
    if let Ok(mut hits) = sink.lock() {
        hits.push(url.to_string());
    }
}

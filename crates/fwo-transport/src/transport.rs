use std::sync::Arc;
use std::time::Duration;

use fwo_domain::DeviceCredentials;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::error::TransportError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(40);
const MAX_ATTEMPTS: u32 = 3;

/// A request to be cloned `n` times by [`RedfishTransport::create_task_list`] and
/// dispatched concurrently by [`RedfishTransport::launch`].
#[derive(Debug, Clone)]
pub struct TaskTemplate {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub credentials: DeviceCredentials,
}

/// One independent unit of work produced by `create_task_list`.
#[derive(Debug, Clone)]
pub struct Task {
    pub index: usize,
    pub template: TaskTemplate,
}

/// Outcome of one dispatched [`Task`], delivered on `launch`'s channel.
#[derive(Debug)]
pub struct CompletedTask {
    pub index: usize,
    pub result: Result<Value, TransportError>,
}

struct Inner {
    client: reqwest::Client,
    ready: bool,
}

/// Pool of concurrent HTTPS request tasks with per-task retries, timeout, and a
/// live-swappable CA trust bundle (§4.3).
///
/// Security state lives behind a `RwLock`: the swap path takes it exclusively so no
/// request can straddle old and new trust material, while request-issuing code only
/// needs a shared read to clone the current `reqwest::Client` (cheap — internally
/// `Arc`-backed).
pub struct RedfishTransport {
    inner: RwLock<Inner>,
}

impl RedfishTransport {
    /// Builds a transport that accepts any TLS certificate, used until the first
    /// CA bundle install completes (or permanently, in insecure test/dev mode).
    pub fn new_insecure() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(TransportError::BuildClient)?;
        Ok(Self {
            inner: RwLock::new(Inner { client, ready: false }),
        })
    }

    pub async fn is_ready(&self) -> bool {
        self.inner.read().await.ready
    }

    /// Swap the CA trust bundle atomically (§4.3 `setSecurity`). Builds the new
    /// verified client before taking the write lock, so the exclusive hold is as
    /// short as the swap itself.
    pub async fn set_security(&self, ca_bundle: &[u8]) -> Result<(), TransportError> {
        let cert = reqwest::Certificate::from_pem(ca_bundle).map_err(TransportError::BuildClient)?;
        let client = reqwest::Client::builder()
            .add_root_certificate(cert)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(TransportError::BuildClient)?;

        let mut guard = self.inner.write().await;
        guard.client = client;
        guard.ready = true;
        debug!("redfish transport: CA bundle installed, transport ready");
        Ok(())
    }

    /// §4.3 `createTaskList`: produce `n` independent task handles from one template.
    pub fn create_task_list(&self, template: TaskTemplate, n: usize) -> Vec<Task> {
        (0..n)
            .map(|index| Task {
                index,
                template: template.clone(),
            })
            .collect()
    }

    /// §4.3 `launch`: dispatch every task concurrently. Completion order on the
    /// returned channel is unspecified; the caller must drain exactly `tasks.len()`
    /// receives.
    pub async fn launch(self: &Arc<Self>, tasks: Vec<Task>) -> mpsc::Receiver<CompletedTask> {
        let (tx, rx) = mpsc::channel(tasks.len().max(1));
        for task in tasks {
            let transport = Arc::clone(self);
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = transport.execute_with_retry(&task.template).await;
                let _ = tx
                    .send(CompletedTask {
                        index: task.index,
                        result,
                    })
                    .await;
            });
        }
        rx
    }

    /// §4.3 `close`: releases transport resources. A no-op for an empty task list
    /// (`n == 0`), so callers never need to special-case that.
    pub async fn close(&self, _tasks: Vec<Task>) {}

    async fn execute_with_retry(&self, template: &TaskTemplate) -> Result<Value, TransportError> {
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.execute_once(template).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(url = %template.url, attempt, error = %err, "redfish request failed, retrying");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(TransportError::Timeout {
            url: template.url.clone(),
            attempts: MAX_ATTEMPTS,
        }))
    }

    async fn execute_once(&self, template: &TaskTemplate) -> Result<Value, TransportError> {
        let client = self.inner.read().await.client.clone();

        let mut req = client.request(template.method.clone(), &template.url).basic_auth(
            &template.credentials.username,
            Some(&template.credentials.password),
        );
        if let Some(body) = &template.body {
            req = req.json(body);
        }

        let resp = tokio::time::timeout(REQUEST_TIMEOUT, req.send())
            .await
            .map_err(|_| TransportError::Timeout {
                url: template.url.clone(),
                attempts: 1,
            })??;

        let resp = resp.error_for_status()?;
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            Ok(Value::Null)
        } else {
            Ok(serde_json::from_slice(&bytes)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwo_domain::DeviceCredentials;
    use wiremock::matchers::method as wm_method;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds() -> DeviceCredentials {
        DeviceCredentials {
            username: "root".into(),
            password: "secret".into(),
        }
    }

    #[tokio::test]
    async fn insecure_transport_starts_not_ready() {
        let transport = RedfishTransport::new_insecure().unwrap();
        assert!(!transport.is_ready().await);
    }

    #[tokio::test]
    async fn set_security_marks_ready() {
        let transport = RedfishTransport::new_insecure().unwrap();
        let pem = include_bytes!("../tests/fixtures/test-ca.pem");
        transport.set_security(pem).await.unwrap();
        assert!(transport.is_ready().await);
    }

    #[tokio::test]
    async fn launch_dispatches_every_task_and_drains_exact_count() {
        let server = MockServer::start().await;
        Mock::given(wm_method("GET"))
            .and(path("/redfish/v1/Chassis"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"Members": []})))
            .mount(&server)
            .await;

        let transport = Arc::new(RedfishTransport::new_insecure().unwrap());
        let template = TaskTemplate {
            method: Method::GET,
            url: format!("{}/redfish/v1/Chassis", server.uri()),
            body: None,
            credentials: creds(),
        };
        let tasks = transport.create_task_list(template, 4);
        let mut rx = transport.launch(tasks).await;

        let mut received = 0;
        while let Some(completed) = rx.recv().await {
            assert!(completed.result.is_ok());
            received += 1;
        }
        assert_eq!(received, 4);
    }

    #[tokio::test]
    async fn close_on_empty_task_list_is_a_no_op() {
        let transport = RedfishTransport::new_insecure().unwrap();
        transport.close(vec![]).await;
    }

    #[tokio::test]
    async fn failed_request_surfaces_as_error() {
        let server = MockServer::start().await;
        Mock::given(wm_method("GET"))
            .and(path("/redfish/v1/Chassis"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transport = Arc::new(RedfishTransport::new_insecure().unwrap());
        let template = TaskTemplate {
            method: Method::GET,
            url: format!("{}/redfish/v1/Chassis", server.uri()),
            body: None,
            credentials: creds(),
        };
        let tasks = transport.create_task_list(template, 1);
        let mut rx = transport.launch(tasks).await;
        let completed = rx.recv().await.unwrap();
        assert!(completed.result.is_err());
    }
}

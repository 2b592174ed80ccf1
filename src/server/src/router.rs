use serde_json::{json, Value};
use skizze_manager::{Error, Manager, Result};
use skizze_sketches::registry::DEFAULT_TYPE;

use crate::protocol::{status, Request, Response};

/// Router translates method + path + body into manager calls. It knows
/// nothing about the transport carrying them.
///
/// An empty path addresses the collection of domains, any other path the
/// domain of that name.
#[derive(Clone)]
pub struct Router {
    manager: Manager,
}

impl Router {
    pub fn new(manager: Manager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub async fn handle(&self, method: &str, path: &str, body: &[u8]) -> (u16, Response) {
        let domain = path.strip_prefix('/').unwrap_or(path).trim();
        let method = method.to_ascii_uppercase();

        let r = match Request::parse(body) {
            Ok(req) if domain.is_empty() => self.handle_collection(&method, req).await,
            Ok(req) => self.handle_domain(&method, domain, req).await,
            Err(e) => Err(e),
        };

        match r {
            Ok(result) => (200, Response::ok(result)),
            Err(e) => {
                let code = status(e.kind());
                if code >= 500 {
                    tracing::error!("{} {} failed: {}", method, path, e);
                } else {
                    tracing::debug!("{} {} rejected: {}", method, path, e);
                }
                (code, Response::error(&e))
            }
        }
    }

    async fn handle_collection(&self, method: &str, _req: Request) -> Result<Value> {
        match method {
            "GET" => Ok(json!(self.manager.get_domains().await?)),
            "MERGE" => Err(Error::NotSupported {
                sketch_type: "*".to_string(),
                op: "merge",
            }),
            _ => Err(Error::InvalidMethod(method.to_string())),
        }
    }

    async fn handle_domain(&self, method: &str, domain: &str, req: Request) -> Result<Value> {
        match method {
            "GET" => {
                let result = self.manager.get_count_for_domain(domain).await?;
                Ok(json!(result))
            }
            "POST" => {
                let sketch_type = match req.domain_type.trim() {
                    "" => DEFAULT_TYPE,
                    t => t,
                };
                self.manager
                    .create_domain(domain, sketch_type, req.capacity)
                    .await?;
                Ok(json!(true))
            }
            "PUT" => {
                let ok = self.manager.add_to_domain(domain, &req.values()).await?;
                Ok(json!(ok))
            }
            "PURGE" => {
                let ok = self
                    .manager
                    .delete_from_domain(domain, &req.values())
                    .await?;
                Ok(json!(ok))
            }
            "DELETE" => {
                self.manager.delete_domain(domain).await?;
                Ok(json!(true))
            }
            _ => Err(Error::InvalidMethod(method.to_string())),
        }
    }
}

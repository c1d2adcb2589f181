//! Service directory lookups.

use super::{expect_args, Function, FunctionError, ResolutionCause};
use crate::config::ServicesConfig;
use crate::context::EvaluationContext;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Directory resolving logical service names to backend URLs.
///
/// Implemented by the hosting gateway; the engine only consumes it.
#[async_trait]
pub trait ServiceDirectory: Send + Sync {
    /// Look up the URL of `service` in `cluster`. `Ok(None)` is a miss.
    async fn lookup(&self, cluster: &str, service: &str) -> Result<Option<String>, DirectoryError>;
}

/// Failure of the directory itself, as opposed to a lookup miss.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct DirectoryError(pub String);

/// In-memory directory keyed by cluster then service name.
#[derive(Debug, Clone, Default)]
pub struct StaticServiceDirectory {
    clusters: HashMap<String, HashMap<String, String>>,
}

impl StaticServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    pub fn with_service(
        mut self,
        cluster: impl Into<String>,
        service: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        self.insert(cluster, service, url);
        self
    }

    pub fn insert(
        &mut self,
        cluster: impl Into<String>,
        service: impl Into<String>,
        url: impl Into<String>,
    ) {
        self.clusters
            .entry(cluster.into())
            .or_default()
            .insert(service.into(), url.into());
    }

    /// Number of entries across all clusters.
    pub fn len(&self) -> usize {
        self.clusters.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&ServicesConfig> for StaticServiceDirectory {
    fn from(config: &ServicesConfig) -> Self {
        Self {
            clusters: config.clusters.clone(),
        }
    }
}

#[async_trait]
impl ServiceDirectory for StaticServiceDirectory {
    async fn lookup(&self, cluster: &str, service: &str) -> Result<Option<String>, DirectoryError> {
        Ok(self
            .clusters
            .get(cluster)
            .and_then(|services| services.get(service))
            .cloned())
    }
}

/// Which part of the backend URL a service function yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePart {
    /// The URL exactly as stored in the directory
    Url,
    Scheme,
    Host,
    /// Explicit port, or the scheme's well-known default
    Port,
    /// `host:port`
    Addr,
    Path,
}

impl ServicePart {
    pub const ALL: [ServicePart; 6] = [
        ServicePart::Url,
        ServicePart::Scheme,
        ServicePart::Host,
        ServicePart::Port,
        ServicePart::Addr,
        ServicePart::Path,
    ];

    /// Name the function is registered under.
    pub fn function_name(self) -> &'static str {
        match self {
            ServicePart::Url => "serviceUrl",
            ServicePart::Scheme => "serviceScheme",
            ServicePart::Host => "serviceHost",
            ServicePart::Port => "servicePort",
            ServicePart::Addr => "serviceAddr",
            ServicePart::Path => "servicePath",
        }
    }

    fn extract(self, raw: &str) -> Result<String, String> {
        if self == ServicePart::Url {
            return Ok(raw.to_string());
        }

        let url = Url::parse(raw).map_err(|e| format!("invalid service URL '{}': {}", raw, e))?;
        let host = || {
            url.host_str()
                .map(str::to_string)
                .ok_or_else(|| format!("service URL '{}' has no host", raw))
        };
        let port = || {
            url.port_or_known_default()
                .ok_or_else(|| format!("service URL '{}' has no port", raw))
        };

        match self {
            ServicePart::Url => Ok(raw.to_string()),
            ServicePart::Scheme => Ok(url.scheme().to_string()),
            ServicePart::Host => host(),
            ServicePart::Port => port().map(|p| p.to_string()),
            ServicePart::Addr => Ok(format!("{}:{}", host()?, port()?)),
            ServicePart::Path => Ok(url.path().to_string()),
        }
    }
}

/// Resolves a logical service name through a [`ServiceDirectory`] using the
/// context's cluster.
pub struct ServiceFunction {
    part: ServicePart,
    directory: Arc<dyn ServiceDirectory>,
}

impl ServiceFunction {
    pub fn new(part: ServicePart, directory: Arc<dyn ServiceDirectory>) -> Self {
        Self { part, directory }
    }
}

#[async_trait]
impl Function for ServiceFunction {
    async fn resolve(
        &self,
        ctx: &EvaluationContext,
        args: &[String],
    ) -> Result<String, FunctionError> {
        let name = self.part.function_name();
        expect_args(name, args, 1)?;
        let service = &args[0];
        let cluster = ctx.cluster();

        let raw = self
            .directory
            .lookup(cluster, service)
            .await
            .map_err(|e| FunctionError::resolution(name, ResolutionCause::Directory(e.0)))?
            .ok_or_else(|| FunctionError::ServiceNotFound {
                cluster: cluster.to_string(),
                service: service.clone(),
            })?;

        debug!(
            correlation_id = ctx.correlation_id(),
            cluster,
            service = %service,
            url = %raw,
            "Resolved service"
        );

        self.part
            .extract(&raw)
            .map_err(|reason| FunctionError::resolution(name, ResolutionCause::Failed(reason)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> Arc<dyn ServiceDirectory> {
        Arc::new(
            StaticServiceDirectory::new()
                .with_service("test-cluster", "NAMENODE", "test-nn-scheme://test-nn-host:411")
                .with_service("test-cluster", "JOBTRACKER", "test-jt-scheme://test-jt-host:511")
                .with_service("test-cluster", "WEBHDFS", "http://webhdfs-host/webhdfs/v1")
                .with_service("test-cluster", "BROKEN", "not a url"),
        )
    }

    async fn call(part: ServicePart, service: &str) -> Result<String, FunctionError> {
        let function = ServiceFunction::new(part, directory());
        let ctx = EvaluationContext::new("test-cluster");
        function.resolve(&ctx, &[service.to_string()]).await
    }

    #[tokio::test]
    async fn test_service_url() {
        assert_eq!(
            call(ServicePart::Url, "NAMENODE").await.unwrap(),
            "test-nn-scheme://test-nn-host:411"
        );
        assert_eq!(
            call(ServicePart::Url, "JOBTRACKER").await.unwrap(),
            "test-jt-scheme://test-jt-host:511"
        );
    }

    #[tokio::test]
    async fn test_service_parts() {
        assert_eq!(call(ServicePart::Scheme, "NAMENODE").await.unwrap(), "test-nn-scheme");
        assert_eq!(call(ServicePart::Host, "NAMENODE").await.unwrap(), "test-nn-host");
        assert_eq!(call(ServicePart::Port, "NAMENODE").await.unwrap(), "411");
        assert_eq!(call(ServicePart::Addr, "JOBTRACKER").await.unwrap(), "test-jt-host:511");
        assert_eq!(call(ServicePart::Port, "WEBHDFS").await.unwrap(), "80");
        assert_eq!(call(ServicePart::Path, "WEBHDFS").await.unwrap(), "/webhdfs/v1");
    }

    #[tokio::test]
    async fn test_service_not_found() {
        let err = call(ServicePart::Url, "OOZIE").await.unwrap_err();
        assert_eq!(
            err,
            FunctionError::ServiceNotFound {
                cluster: "test-cluster".to_string(),
                service: "OOZIE".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_lookup_uses_context_cluster() {
        let function = ServiceFunction::new(ServicePart::Url, directory());
        let ctx = EvaluationContext::new("other-cluster");
        let err = function
            .resolve(&ctx, &["NAMENODE".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, FunctionError::ServiceNotFound { ref cluster, .. } if cluster == "other-cluster"));
    }

    #[tokio::test]
    async fn test_unparseable_url() {
        let err = call(ServicePart::Host, "BROKEN").await.unwrap_err();
        assert!(matches!(
            err,
            FunctionError::Resolution {
                cause: ResolutionCause::Failed(_),
                ..
            }
        ));
        assert_eq!(call(ServicePart::Url, "BROKEN").await.unwrap(), "not a url");
    }

    #[tokio::test]
    async fn test_arity() {
        let function = ServiceFunction::new(ServicePart::Url, directory());
        let ctx = EvaluationContext::new("test-cluster");
        let err = function.resolve(&ctx, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            FunctionError::Resolution {
                cause: ResolutionCause::Arity { expected: 1, actual: 0 },
                ..
            }
        ));
    }

    #[test]
    fn test_static_directory_len() {
        let dir = StaticServiceDirectory::new()
            .with_service("a", "X", "http://x")
            .with_service("b", "X", "http://y");
        assert_eq!(dir.len(), 2);
        assert!(!dir.is_empty());
    }
}

use crate::model::TargetDescriptor;
use anyhow::{Context, Result};
use url::Url;

#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
    token: String,
}

impl Endpoints {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let mut base = Url::parse(base_url.trim())
            .with_context(|| format!("invalid tunnel base url '{base_url}'"))?;
        let scheme = match base.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => anyhow::bail!("unsupported tunnel scheme '{other}' (expected ws or wss)"),
        };
        if base.scheme() != scheme {
            base.set_scheme(scheme)
                .map_err(|_| anyhow::anyhow!("failed to rewrite scheme of {base_url}"))?;
        }
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self {
            base,
            token: token.into(),
        })
    }

    pub fn host(&self) -> &str {
        self.base.host_str().unwrap_or("-")
    }

    pub fn terminal(&self, target: &TargetDescriptor) -> Url {
        self.build(&[
            "ws",
            "terminal",
            &target.namespace,
            &target.pod_name,
            &target.container,
        ])
    }

    pub fn logs(&self) -> Url {
        self.build(&["ws", "logs"])
    }

    pub fn metrics(&self, target: &TargetDescriptor) -> Url {
        self.build(&["ws", "metrics", &target.namespace])
    }

    fn build(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url.query_pairs_mut().append_pair("token", &self.token);
        url
    }
}

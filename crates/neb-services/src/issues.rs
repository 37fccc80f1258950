//! Issue references: expands `owner/repo#123` (and `#123` against a default
//! repository) into links, and answers `!issues link owner/repo 123`.

use std::sync::LazyLock;

use async_trait::async_trait;
use neb_core::{
    domain::{Content, ServiceRecord},
    errors::Error,
    matcher::{Command, CommandContext, Expansion},
    service::{RoomSender, Service, ServiceBase},
    Result,
};
use regex::Regex;
use serde::Deserialize;
use tracing::info;

pub const SERVICE_TYPE: &str = "issues";

const DEFAULT_BASE_URL: &str = "https://github.com";

static QUALIFIED_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([\w.-]+)/([\w.-]+)#(\d+)\b").expect("valid pattern"));
static BARE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\B#(\d+)\b").expect("valid pattern"));

#[derive(Clone, Debug, Deserialize)]
pub struct IssuesConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// `owner/repo` used for bare `#123` references.
    #[serde(default)]
    pub default_repo: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for IssuesConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_repo: None,
        }
    }
}

pub struct IssuesService {
    base: ServiceBase,
    config: IssuesConfig,
}

pub fn build(record: &ServiceRecord) -> Result<Box<dyn Service>> {
    let config = if record.config.is_null() {
        IssuesConfig::default()
    } else {
        serde_json::from_value(record.config.clone())
            .map_err(|e| Error::Validation(format!("issues config: {e}")))?
    };
    Ok(Box::new(IssuesService {
        base: ServiceBase::from_record(record),
        config,
    }))
}

#[derive(Clone, Debug)]
struct Linker {
    base_url: String,
}

impl Linker {
    fn link(&self, owner: &str, repo: &str, number: &str) -> Content {
        let url = format!("{}/{owner}/{repo}/issues/{number}", self.base_url);
        Content::html_notice(
            format!("{owner}/{repo}#{number}: {url}"),
            format!(r#"<a href="{url}">{owner}/{repo}#{number}</a>"#),
        )
    }
}

fn split_repo(s: &str) -> Option<(&str, &str)> {
    let (owner, repo) = s.split_once('/')?;
    let valid = |p: &str| {
        !p.is_empty()
            && p
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    };
    (valid(owner) && valid(repo)).then_some((owner, repo))
}

impl IssuesService {
    fn linker(&self) -> Linker {
        Linker {
            base_url: self.config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Service for IssuesService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn commands(&self) -> Vec<Command> {
        let linker = self.linker();
        vec![Command::new(["issues", "link"], move |ctx: CommandContext| {
            let linker = linker.clone();
            async move {
                let [repo, number] = ctx.args.as_slice() else {
                    anyhow::bail!("usage: !issues link owner/repo number");
                };
                let Some((owner, repo)) = split_repo(repo) else {
                    anyhow::bail!("not a repository: {repo}");
                };
                if number.parse::<u64>().is_err() {
                    anyhow::bail!("not an issue number: {number}");
                }
                Ok(Some(linker.link(owner, repo, number)))
            }
        })
        .with_help("Link to an issue: !issues link owner/repo number")]
    }

    fn expansions(&self) -> Vec<Expansion> {
        let linker = self.linker();
        let mut out = vec![Expansion::new(
            QUALIFIED_REF.clone(),
            move |_, _, groups| Some(linker.link(&groups[1], &groups[2], &groups[3])),
        )];

        if let Some((owner, repo)) = self.config.default_repo.as_deref().and_then(split_repo) {
            let linker = self.linker();
            let (owner, repo) = (owner.to_string(), repo.to_string());
            out.push(Expansion::new(BARE_REF.clone(), move |_, _, groups| {
                Some(linker.link(&owner, &repo, &groups[1]))
            }));
        }
        out
    }

    async fn register(
        &self,
        _old: Option<&dyn Service>,
        sender: &dyn RoomSender,
    ) -> anyhow::Result<()> {
        let url = self.config.base_url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            anyhow::bail!("base_url must be an http(s) URL, got {url:?}");
        }
        if let Some(repo) = self.config.default_repo.as_deref() {
            if split_repo(repo).is_none() {
                anyhow::bail!("default_repo must look like owner/repo, got {repo:?}");
            }
        }
        info!(
            service_id = %self.base.id,
            user_id = %sender.user_id(),
            base_url = %url,
            "issues service registered"
        );
        Ok(())
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! GitHub provider through its REST API.

use crate::{
    app::TOOL_NAME,
    git::{
        provider::{CreateRepoOptions, GetRepoOptions, Provider, ProviderError, ProviderOptions, Result},
        Auth,
    },
};

use reqwest::{
    blocking::{Client, RequestBuilder, Response},
    header::{ACCEPT, USER_AGENT},
    StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Public GitHub API endpoint.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// GitHub REST client.
#[derive(Debug, Clone)]
pub struct GitHub {
    client: Client,
    api_url: String,
    auth: Option<Auth>,
}

#[derive(Debug, Deserialize)]
struct RepositoryBody {
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct UserBody {
    login: String,
}

#[derive(Debug, Serialize)]
struct CreateRepoBody<'a> {
    name: &'a str,
    private: bool,
}

impl GitHub {
    /// Construct new GitHub client out of provider options.
    ///
    /// A custom host is treated as GitHub Enterprise, whose API lives under
    /// `/api/v3`.
    ///
    /// # Errors
    ///
    /// - Return [`ProviderError::Http`] if client cannot be built.
    pub fn new(opts: &ProviderOptions) -> Result<Self> {
        let api_url = match opts.host.as_deref() {
            Some(host) if !host.is_empty() => enterprise_api_url(host),
            _ => GITHUB_API_URL.to_string(),
        };

        Self::with_api_url(api_url, opts.auth.clone())
    }

    /// Construct new GitHub client against an exact API URL.
    ///
    /// # Errors
    ///
    /// - Return [`ProviderError::Http`] if client cannot be built.
    pub fn with_api_url(api_url: impl Into<String>, auth: Option<Auth>) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header(USER_AGENT, TOOL_NAME)
            .header(ACCEPT, "application/vnd.github+json");

        match &self.auth {
            Some(auth) => builder.basic_auth(auth.username(), Some(&auth.password)),
            None => builder,
        }
    }

    fn authenticated_user(&self) -> Result<String> {
        let url = format!("{}/user", self.api_url);
        let response = self.request(self.client.get(&url)).send()?;
        let user: UserBody = check_status(response, &url)?.json()?;

        Ok(user.login)
    }
}

impl Provider for GitHub {
    #[instrument(skip(self), level = "debug")]
    fn get_repository(&self, opts: &GetRepoOptions) -> Result<String> {
        let url = format!("{}/repos/{}/{}", self.api_url, opts.owner, opts.name);
        let response = self.request(self.client.get(&url)).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                owner: opts.owner.clone(),
                name: opts.name.clone(),
            });
        }

        let repository: RepositoryBody = check_status(response, &url)?.json()?;
        debug!("found {}", repository.clone_url);

        Ok(repository.clone_url)
    }

    /// Create repository.
    ///
    /// The repository is created under the authenticated user if the owner is
    /// that user, and under the owner organization otherwise.
    #[instrument(skip(self), level = "debug")]
    fn create_repository(&self, opts: &CreateRepoOptions) -> Result<String> {
        let login = self.authenticated_user()?;
        let url = if login == opts.owner {
            format!("{}/user/repos", self.api_url)
        } else {
            format!("{}/orgs/{}/repos", self.api_url, opts.owner)
        };

        info!("create repository {}/{}", opts.owner, opts.name);
        let body = CreateRepoBody {
            name: opts.name.as_str(),
            private: opts.private,
        };
        let response = self.request(self.client.post(&url)).json(&body).send()?;
        let repository: RepositoryBody = check_status(response, &url)?.json()?;

        Ok(repository.clone_url)
    }
}

fn enterprise_api_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.ends_with("/api/v3") {
        return host.to_string();
    }

    format!("{host}/api/v3")
}

fn check_status(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Err(ProviderError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        message: response.text().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;

    fn get_opts() -> GetRepoOptions {
        GetRepoOptions {
            owner: "foo".into(),
            name: "bar".into(),
        }
    }

    #[test]
    fn get_repository_returns_clone_url() -> anyhow::Result<()> {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/repos/foo/bar")
            .match_header("user-agent", TOOL_NAME)
            .with_status(200)
            .with_body(r#"{"clone_url": "https://github.com/foo/bar.git", "id": 1}"#)
            .create();

        let github = GitHub::with_api_url(server.url(), None)?;
        assert_eq!(github.get_repository(&get_opts())?, "https://github.com/foo/bar.git");
        mock.assert();

        Ok(())
    }

    #[test]
    fn get_missing_repository() -> anyhow::Result<()> {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/repos/foo/bar")
            .with_status(404)
            .with_body(r#"{"message": "Not Found"}"#)
            .create();

        let github = GitHub::with_api_url(server.url(), None)?;
        let result = github.get_repository(&get_opts());
        assert!(matches!(result, Err(ProviderError::NotFound { .. })));

        Ok(())
    }

    #[test]
    fn get_repository_surfaces_server_errors() -> anyhow::Result<()> {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/repos/foo/bar")
            .with_status(500)
            .with_body("boom")
            .create();

        let github = GitHub::with_api_url(server.url(), None)?;
        let result = github.get_repository(&get_opts());
        assert!(matches!(result, Err(ProviderError::Status { status: 500, .. })));

        Ok(())
    }

    #[test]
    fn create_repository_for_authenticated_user() -> anyhow::Result<()> {
        let mut server = Server::new();
        let user = server
            .mock("GET", "/user")
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .with_status(200)
            .with_body(r#"{"login": "foo"}"#)
            .create();
        let create = server
            .mock("POST", "/user/repos")
            .match_body(Matcher::Json(serde_json::json!({"name": "bar", "private": true})))
            .with_status(201)
            .with_body(r#"{"clone_url": "https://github.com/foo/bar.git"}"#)
            .create();

        let github = GitHub::with_api_url(server.url(), Some(Auth::new("foo", "token")))?;
        let result = github.create_repository(&CreateRepoOptions {
            owner: "foo".into(),
            name: "bar".into(),
            private: true,
        })?;
        assert_eq!(result, "https://github.com/foo/bar.git");
        user.assert();
        create.assert();

        Ok(())
    }

    #[test]
    fn create_repository_for_organization() -> anyhow::Result<()> {
        let mut server = Server::new();
        let _user = server
            .mock("GET", "/user")
            .with_status(200)
            .with_body(r#"{"login": "foo"}"#)
            .create();
        let create = server
            .mock("POST", "/orgs/acme/repos")
            .with_status(201)
            .with_body(r#"{"clone_url": "https://github.com/acme/bar.git"}"#)
            .create();

        let github = GitHub::with_api_url(server.url(), Some(Auth::new("foo", "token")))?;
        let result = github.create_repository(&CreateRepoOptions {
            owner: "acme".into(),
            name: "bar".into(),
            private: false,
        })?;
        assert_eq!(result, "https://github.com/acme/bar.git");
        create.assert();

        Ok(())
    }

    #[test]
    fn enterprise_hosts() {
        assert_eq!(enterprise_api_url("https://ghe.acme.io"), "https://ghe.acme.io/api/v3");
        assert_eq!(enterprise_api_url("https://ghe.acme.io/api/v3/"), "https://ghe.acme.io/api/v3");
    }
}

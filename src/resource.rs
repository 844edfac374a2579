use url::Url;

/// Just a wrapper around a URL, credentials and the HTTP client used to reach it
#[derive(Clone, Debug)]
pub struct Resource {
    url: Url,
    username: String,
    password: String,
    http: reqwest::Client,
}

impl Resource {
    pub fn new(url: Url, username: String, password: String) -> Self {
        Self { url, username, password, http: reqwest::Client::new() }
    }

    pub fn url(&self) -> &Url { &self.url }
    pub fn username(&self) -> &String { &self.username }
    pub fn password(&self) -> &String { &self.password }
    pub fn http(&self) -> &reqwest::Client { &self.http }

    /// Build a new Resource by keeping the same credentials, scheme and server from `base` but changing the path part
    pub fn combine(&self, new_path: &str) -> Resource {
        let mut built = (*self).clone();
        built.url.set_path(new_path);
        built
    }

    /// Build a new Resource for a URL relative to this one (e.g. an href returned by the server)
    pub fn join(&self, relative: &str) -> Result<Resource, url::ParseError> {
        let mut built = (*self).clone();
        built.url = self.url.join(relative)?;
        Ok(built)
    }

    /// Build a new Resource for another absolute URL on the same server
    pub fn with_url(&self, url: Url) -> Resource {
        let mut built = (*self).clone();
        built.url = url;
        built
    }
}

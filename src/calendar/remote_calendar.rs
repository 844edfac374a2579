use std::collections::HashSet;

use async_trait::async_trait;
use url::Url;

use crate::calendar::{CalendarId, SupportedComponents, SyncDelta, TodoStub};
use crate::client::{self, DavMethod, DavResponse};
use crate::error::DavError;
use crate::multistatus::{self, Multistatus};
use crate::resource::Resource;
use crate::todo::{Todo, VersionTag};
use crate::traits::DavCalendar;
use crate::utils::escape_xml;

static ALL_TASKS_BODY: &str = r#"
    <c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
        <d:prop>
            <d:getetag />
            <c:calendar-data />
        </d:prop>
        <c:filter>
            <c:comp-filter name="VCALENDAR">
                <c:comp-filter name="VTODO" />
            </c:comp-filter>
        </c:filter>
    </c:calendar-query>
"#;

static OPEN_TASKS_BODY: &str = r#"
    <c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
        <d:prop>
            <d:getetag />
            <c:calendar-data />
        </d:prop>
        <c:filter>
            <c:comp-filter name="VCALENDAR">
                <c:comp-filter name="VTODO">
                    <c:prop-filter name="STATUS">
                        <c:text-match negate-condition="yes">COMPLETED</c:text-match>
                    </c:prop-filter>
                    <c:prop-filter name="STATUS">
                        <c:text-match negate-condition="yes">CANCELLED</c:text-match>
                    </c:prop-filter>
                </c:comp-filter>
            </c:comp-filter>
        </c:filter>
    </c:calendar-query>
"#;

static NO_STATUS_TASKS_BODY: &str = r#"
    <c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
        <d:prop>
            <d:getetag />
            <c:calendar-data />
        </d:prop>
        <c:filter>
            <c:comp-filter name="VCALENDAR">
                <c:comp-filter name="VTODO">
                    <c:prop-filter name="STATUS">
                        <c:is-not-defined />
                    </c:prop-filter>
                </c:comp-filter>
            </c:comp-filter>
        </c:filter>
    </c:calendar-query>
"#;

static TASK_BY_UID_BODY: &str = r#"
    <c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
        <d:prop>
            <d:getetag />
            <c:calendar-data />
        </d:prop>
        <c:filter>
            <c:comp-filter name="VCALENDAR">
                <c:comp-filter name="VTODO">
                    <c:prop-filter name="UID">
                        <c:text-match collation="i;octet">{uid}</c:text-match>
                    </c:prop-filter>
                </c:comp-filter>
            </c:comp-filter>
        </c:filter>
    </c:calendar-query>
"#;

static SYNC_COLLECTION_BODY: &str = r#"
    <d:sync-collection xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
        <d:sync-token>{token}</d:sync-token>
        <d:sync-level>1</d:sync-level>
        <d:prop>
            <d:getetag />
            {data}
        </d:prop>
    </d:sync-collection>
"#;

/// Statuses servers use to refuse a sync token they do not know (anymore)
const REJECTED_TOKEN_STATUSES: [u16; 3] = [403, 409, 412];


/// A CalDAV calendar created by a [`Client`](crate::client::Client).
#[derive(Clone, Debug)]
pub struct RemoteCalendar {
    name: String,
    resource: Resource,
    supported_components: SupportedComponents,
}

impl RemoteCalendar {
    pub fn new(name: String, resource: Resource, supported_components: SupportedComponents) -> Self {
        Self { name, resource, supported_components }
    }

    async fn report(&self, body: String) -> Result<Multistatus, DavError> {
        let response = client::query(&self.resource, DavMethod::Report, Some(body), Some(1), &[]).await?;
        response.multistatus()
    }

    /// Build the tasks a calendar-query or sync-collection report returned.
    /// Entries without calendar data are returned as stubs.
    fn todos_from(&self, ms: &Multistatus) -> (Vec<Todo>, Vec<TodoStub>) {
        let mut todos = Vec::new();
        let mut stubs = Vec::new();

        for (href, props) in ms.property_map() {
            let url = match self.resource.url().join(&href) {
                Err(err) => {
                    log::warn!("Unable to build a URL from {} in calendar {}: {}", href, self.name, err);
                    continue;
                },
                Ok(url) => url,
            };
            if url.path().trim_end_matches('/') == self.resource.url().path().trim_end_matches('/') {
                // Some servers list the collection itself
                continue;
            }
            let version_tag = multistatus::prop_text(&props, "getetag").map(VersionTag::from);

            match multistatus::prop_text(&props, "calendar-data").filter(|data| data.is_empty() == false) {
                None => stubs.push(TodoStub{ href: url, version_tag }),
                Some(data) => match crate::ical::parse(&data, url.clone(), version_tag, self.id()) {
                    Err(err) => log::warn!("Ignoring item {} of calendar {}: {}", url, self.name, err),
                    Ok(todo) => todos.push(todo),
                },
            }
        }
        (todos, stubs)
    }

    /// Download a single resource
    async fn get_todo(&self, stub: &TodoStub) -> Result<Option<Todo>, DavError> {
        let resource = self.resource.with_url(stub.href.clone());
        let response = client::query(&resource, DavMethod::Get, None, None, &[]).await?;
        if response.is_not_found() {
            return Ok(None);
        }
        let version_tag = response.etag.clone().or_else(|| stub.version_tag.clone());
        let todo = crate::ical::parse(&response.body, stub.href.clone(), version_tag, self.id())?;
        Ok(Some(todo))
    }

    async fn sync_collection(&self, token: &str, eager: bool) -> Result<DavResponse, DavError> {
        let data = if eager { "<c:calendar-data />" } else { "" };
        let body = SYNC_COLLECTION_BODY
            .replace("{token}", &escape_xml(token))
            .replace("{data}", data);
        client::send(&self.resource, DavMethod::Report, Some(body), Some(1), &[]).await
    }

    fn write_headers(todo: &Todo, creation: bool) -> Vec<(&'static str, String)> {
        if creation {
            return vec![("If-None-Match", "*".to_string())];
        }
        match todo.version_tag() {
            None => Vec::new(),
            Some(tag) => vec![("If-Match", tag.as_str().to_string())],
        }
    }

    async fn put(&self, todo: &Todo, creation: bool) -> Result<Todo, DavError> {
        let ical_text = crate::ical::build_from(todo);
        let resource = self.resource.with_url(todo.href().clone());
        let headers = Self::write_headers(todo, creation);

        let response = client::query(&resource, DavMethod::Put, Some(ical_text.clone()), None, &headers).await?;
        if response.is_not_found() {
            return Err(DavError::NotFound(todo.href().clone()));
        }
        if response.etag.is_none() {
            log::debug!("No ETag in the response to the PUT of {}", todo.href());
        }

        // Without an ETag, the next update will not be conditional
        Ok(Todo::from_server(todo.uid().to_string(), self.id().clone(), todo.href().clone(), response.etag, todo.props().clone(), Some(ical_text)))
    }
}

#[async_trait]
impl DavCalendar for RemoteCalendar {
    fn name(&self) -> &str { &self.name }
    fn id(&self) -> &CalendarId { self.resource.url() }
    fn supported_components(&self) -> SupportedComponents {
        self.supported_components
    }

    async fn list_pending(&self) -> Result<Vec<Todo>, DavError> {
        let open = self.report(OPEN_TASKS_BODY.to_string()).await?;
        let (mut todos, _) = self.todos_from(&open);

        // Servers do not all agree on how a negated text-match treats a missing STATUS
        let no_status = self.report(NO_STATUS_TASKS_BODY.to_string()).await?;
        let (others, _) = self.todos_from(&no_status);
        let mut seen: HashSet<String> = todos.iter().map(|t| t.uid().to_string()).collect();
        for todo in others {
            if seen.insert(todo.uid().to_string()) {
                todos.push(todo);
            }
        }

        // Some servers do not filter negated conditions at all
        let before = todos.len();
        todos.retain(|t| t.is_closed() == false);
        if todos.len() != before {
            log::debug!("Dropped {} closed tasks the server returned as pending in {}", before - todos.len(), self.name);
        }
        Ok(todos)
    }

    async fn list_all(&self) -> Result<Vec<Todo>, DavError> {
        let ms = self.report(ALL_TASKS_BODY.to_string()).await?;
        let (todos, stubs) = self.todos_from(&ms);
        if stubs.is_empty() == false {
            log::warn!("{} items of calendar {} came without calendar data", stubs.len(), self.name);
        }
        Ok(todos)
    }

    async fn fetch_by_uid(&self, uid: &str) -> Result<Option<Todo>, DavError> {
        let body = TASK_BY_UID_BODY.replace("{uid}", &escape_xml(uid));
        let ms = self.report(body).await?;
        let (todos, _) = self.todos_from(&ms);
        // text-match is a substring match
        Ok(todos.into_iter().find(|t| t.uid() == uid))
    }

    async fn create(&self, todo: &Todo) -> Result<Todo, DavError> {
        self.put(todo, true).await
    }

    async fn update(&self, todo: &Todo) -> Result<Todo, DavError> {
        self.put(todo, false).await
    }

    async fn delete(&self, todo: &Todo) -> Result<(), DavError> {
        let resource = self.resource.with_url(todo.href().clone());
        let response = client::query(&resource, DavMethod::Delete, None, None, &[]).await?;
        if response.is_not_found() {
            log::debug!("{} was already deleted from {}", todo.uid(), self.name);
        }
        Ok(())
    }

    async fn list_incremental(&self, token: Option<&str>, eager: bool) -> Result<SyncDelta, DavError> {
        let token = token.unwrap_or("");
        let mut response = self.sync_collection(token, eager).await?;
        if token.is_empty() == false
            && REJECTED_TOKEN_STATUSES.contains(&response.status)
            && response.body.contains("valid-sync-token")
        {
            log::info!("Calendar {} does not accept its sync token anymore, listing it again", self.name);
            response = self.sync_collection("", eager).await?;
        }
        let response = response.check_status()?;
        if response.is_not_found() {
            return Err(DavError::NotFound(self.id().clone()));
        }

        let ms = response.multistatus()?;
        let (mut loaded, mut stubs) = self.todos_from(&ms);
        if eager {
            // Some servers do not send calendar data in sync reports
            for stub in std::mem::take(&mut stubs) {
                match self.get_todo(&stub).await? {
                    None => log::debug!("{} disappeared before it could be downloaded", stub.href),
                    Some(todo) => loaded.push(todo),
                }
            }
        }

        let removed: Vec<Url> = ms.removed_hrefs().iter()
            .filter_map(|href| self.resource.url().join(href).ok())
            .collect();

        Ok(SyncDelta { loaded, stubs, removed, token: ms.sync_token })
    }
}

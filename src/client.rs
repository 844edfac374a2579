//! This module provides a client to connect to a CalDAV server

use std::collections::HashMap;
use std::convert::TryFrom;
use std::error::Error;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use minidom::Element;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use url::Url;

use crate::calendar::remote_calendar::RemoteCalendar;
use crate::calendar::{CalendarId, SupportedComponents};
use crate::error::{DavError, RequestKind};
use crate::multistatus::{self, Multistatus, PropMap, PropertyMap};
use crate::resource::Resource;
use crate::todo::VersionTag;
use crate::traits::{CalDavSource, DavCalendar};
use crate::utils::escape_xml;


static PROPFIND_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav" xmlns:cs="http://calendarserver.org/ns/">
       <d:prop>
           {props}
       </d:prop>
    </d:propfind>
"#;

static PROPPATCH_BODY: &str = r#"
    <d:propertyupdate xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
       <d:set>
         <d:prop>
           {props}
         </d:prop>
       </d:set>
    </d:propertyupdate>
"#;

static MKCALENDAR_BODY: &str = r#"
    <c:mkcalendar xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
      <d:set>
        <d:prop>
          <d:displayname>{name}</d:displayname>
          <c:supported-calendar-component-set>
            <c:comp name="VTODO"/>
          </c:supported-calendar-component-set>
        </d:prop>
      </d:set>
    </c:mkcalendar>
"#;

/// Properties needed to tell whether a collection is a task calendar
const CALENDAR_PROPS: [&str; 3] = ["d:displayname", "d:resourcetype", "c:supported-calendar-component-set"];


/// The HTTP methods this crate sends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DavMethod {
    Propfind,
    Report,
    Proppatch,
    Put,
    Post,
    Delete,
    Mkcalendar,
    Get,
}

impl DavMethod {
    fn as_bytes(&self) -> &'static [u8] {
        match self {
            DavMethod::Propfind => b"PROPFIND",
            DavMethod::Report => b"REPORT",
            DavMethod::Proppatch => b"PROPPATCH",
            DavMethod::Put => b"PUT",
            DavMethod::Post => b"POST",
            DavMethod::Delete => b"DELETE",
            DavMethod::Mkcalendar => b"MKCALENDAR",
            DavMethod::Get => b"GET",
        }
    }

    fn as_method(&self) -> Result<Method, DavError> {
        Method::from_bytes(self.as_bytes())
            .map_err(|err| DavError::Transport(format!("Cannot create HTTP method: {}", err)))
    }

    /// The kind of error a failure of this method is reported as
    pub fn request_kind(&self) -> RequestKind {
        match self {
            DavMethod::Propfind | DavMethod::Get => RequestKind::Listing,
            DavMethod::Report => RequestKind::Report,
            DavMethod::Proppatch => RequestKind::PropertySet,
            DavMethod::Put | DavMethod::Post => RequestKind::Creation,
            DavMethod::Delete => RequestKind::Deletion,
            DavMethod::Mkcalendar => RequestKind::CollectionCreation,
        }
    }

    fn content_type(&self) -> &'static str {
        match self {
            DavMethod::Put | DavMethod::Post => "text/calendar; charset=utf-8",
            _ => "application/xml; charset=utf-8",
        }
    }
}


/// What a server answered to a single request
#[derive(Clone, Debug)]
pub struct DavResponse {
    pub url: Url,
    pub method: DavMethod,
    pub status: u16,
    pub reason: String,
    pub body: String,
    /// The `ETag` header, if any
    pub etag: Option<VersionTag>,
}

impl DavResponse {
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// The multistatus body of a 207 response. Other responses have no multistatus, this returns an empty one
    pub fn multistatus(&self) -> Result<Multistatus, DavError> {
        if self.status != 207 {
            return Ok(Multistatus::default());
        }
        Multistatus::parse(&self.body)
    }

    /// Accept any 2xx and 404. Everything else is turned into an error that depends on the method
    pub fn check_status(self) -> Result<Self, DavError> {
        match self.status {
            200..=299 | 404 => Ok(self),
            401 | 403 => Err(DavError::Authorization{ url: self.url, reason: self.reason }),
            status => Err(DavError::Protocol{
                kind: self.method.request_kind(),
                url: self.url,
                status,
                reason: self.reason,
            }),
        }
    }
}


/// Send a request and return the server answer, whatever its status
pub async fn send(resource: &Resource, method: DavMethod, body: Option<String>, depth: Option<u32>, headers: &[(&str, String)]) -> Result<DavResponse, DavError> {
    let mut request = resource.http()
        .request(method.as_method()?, resource.url().clone())
        .basic_auth(resource.username(), Some(resource.password()));
    if let Some(depth) = depth {
        request = request.header("Depth", depth.to_string());
    }
    for (name, value) in headers {
        request = request.header(*name, value.as_str());
    }
    if let Some(body) = body {
        request = request
            .header(CONTENT_TYPE, method.content_type())
            .body(body);
    }

    log::trace!("{:?} {}", method, resource.url());
    let response = request.send().await?;

    let status = response.status();
    let etag = response.headers().get("ETag")
        .and_then(|value| value.to_str().ok())
        .map(|value| VersionTag::from(value.to_string()));
    let body = response.text().await?;

    Ok(DavResponse {
        url: resource.url().clone(),
        method,
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
        body,
        etag,
    })
}

/// Send a request, and classify its status
pub async fn query(resource: &Resource, method: DavMethod, body: Option<String>, depth: Option<u32>, headers: &[(&str, String)]) -> Result<DavResponse, DavError> {
    let response = send(resource, method, body, depth, headers).await?;
    let response = response.check_status()?;
    if response.is_not_found() {
        log::debug!("{:?} {} returned 404", method, resource.url());
    }
    Ok(response)
}

/// Ask for some properties (such as `d:displayname`) of a resource, and of its children when `depth` is 1
pub async fn get_properties(resource: &Resource, props: &[&str], depth: u32) -> Result<PropertyMap, DavError> {
    let prop_list = props.iter()
        .map(|p| format!("<{}/>", p))
        .collect::<Vec<_>>()
        .join("");
    let body = PROPFIND_BODY.replace("{props}", &prop_list);

    let response = query(resource, DavMethod::Propfind, Some(body), Some(depth), &[]).await?;
    Ok(response.multistatus()?.property_map())
}

/// Set some properties (e.g. `("d:displayname", "Groceries")`) of a resource
pub async fn set_properties(resource: &Resource, props: &[(&str, String)]) -> Result<(), DavError> {
    let prop_list = props.iter()
        .map(|(name, value)| format!("<{}>{}</{}>", name, escape_xml(value), name))
        .collect::<Vec<_>>()
        .join("");
    let body = PROPPATCH_BODY.replace("{props}", &prop_list);

    let response = query(resource, DavMethod::Proppatch, Some(body), None, &[]).await?;
    if response.is_not_found() {
        return Err(DavError::NotFound(resource.url().clone()));
    }

    // A 207 response tells the status of every property
    let ms = response.multistatus()?;
    for entry in &ms.responses {
        for propstat in &entry.propstats {
            match propstat.status.or(entry.status) {
                Some(code) if multistatus::TRUSTED_STATUSES.contains(&code) => (),
                None => (),
                Some(code) => return Err(DavError::Protocol{
                    kind: RequestKind::PropertySet,
                    url: resource.url().clone(),
                    status: code,
                    reason: format!("Unable to set {} properties", propstat.props.len()),
                }),
            }
        }
    }
    Ok(())
}


/// A DAV resource, whose properties are cached once they have been fetched
#[derive(Clone, Debug)]
pub struct DavObject {
    resource: Resource,
    properties: Arc<Mutex<PropMap>>,
}

impl DavObject {
    pub fn new(resource: Resource) -> Self {
        Self { resource, properties: Arc::new(Mutex::new(PropMap::new())) }
    }

    pub fn resource(&self) -> &Resource { &self.resource }
    pub fn url(&self) -> &Url { self.resource.url() }

    /// Get a property (e.g. `d:current-user-principal`), from the cache or from the server.
    ///
    /// Returns `None` if the server does not know this property
    pub async fn property(&self, prop: &str) -> Result<Option<Element>, DavError> {
        let local_name = prop.rsplit(':').next().unwrap_or(prop);
        if let Some(value) = self.properties.lock().unwrap().get(local_name) {
            return Ok(Some(value.clone()));
        }

        self.refresh(&[prop]).await?;
        Ok(self.properties.lock().unwrap().get(local_name).cloned())
    }

    /// The `<href>` a property points to
    pub async fn href_property(&self, prop: &str) -> Result<Option<String>, DavError> {
        let value = self.property(prop).await?;
        Ok(value
            .as_ref()
            .and_then(|el| crate::utils::find_elem(el, "href"))
            .map(|href| href.text().trim().to_string())
            .filter(|href| href.is_empty() == false))
    }

    /// Fetch some properties from the server, and add them to the cache
    pub async fn refresh(&self, props: &[&str]) -> Result<(), DavError> {
        let map = get_properties(&self.resource, props, 0).await?;
        let own = multistatus::resolve_href_or_err(&map, self.resource.url())?;
        let mut cache = self.properties.lock().unwrap();
        for (name, value) in own {
            cache.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    pub fn invalidate(&self) {
        self.properties.lock().unwrap().clear();
    }
}


/// A CalDAV source that fetches its data from a CalDAV server
#[derive(Debug)]
pub struct Client {
    root: DavObject,

    principal: Mutex<Option<DavObject>>,
    calendar_home_set: Mutex<Option<Resource>>,
}

impl Client {
    /// Create a client. This does not start a connection
    pub fn new<S: AsRef<str>, T: ToString, U: ToString>(url: S, username: T, password: U) -> Result<Self, Box<dyn Error>> {
        let url = Url::parse(url.as_ref())?;

        Ok(Self{
            root: DavObject::new(Resource::new(url, username.to_string(), password.to_string())),
            principal: Mutex::new(None),
            calendar_home_set: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &Url {
        self.root.url()
    }

    /// Return the principal, or fetch it from the server if not known yet.
    ///
    /// Servers that do not report any principal are assumed to use the base URL
    async fn get_principal(&self) -> Result<DavObject, DavError> {
        if let Some(p) = &*self.principal.lock().unwrap() {
            return Ok(p.clone());
        }

        let principal = match self.root.href_property("d:current-user-principal").await? {
            None => {
                log::info!("No principal reported by {}, using this URL", self.root.url());
                self.root.clone()
            },
            Some(href) => {
                let resource = self.root.resource().join(&href)
                    .map_err(|err| DavError::Xml(format!("Invalid principal href {}: {}", href, err)))?;
                DavObject::new(resource)
            },
        };
        log::debug!("Principal URL is {}", principal.url());

        *self.principal.lock().unwrap() = Some(principal.clone());
        Ok(principal)
    }

    /// Return the calendar home set, or fetch it from the server if not known yet
    async fn get_cal_home_set(&self) -> Result<Resource, DavError> {
        if let Some(h) = &*self.calendar_home_set.lock().unwrap() {
            return Ok(h.clone());
        }
        let principal = self.get_principal().await?;

        let home_set = match principal.href_property("c:calendar-home-set").await? {
            None => {
                log::info!("No calendar home set reported by {}, using this URL", principal.url());
                principal.resource().clone()
            },
            Some(href) => principal.resource().join(&href)
                .map_err(|err| DavError::Xml(format!("Invalid calendar home set href {}: {}", href, err)))?,
        };
        log::debug!("Calendar home set URL is {:?}", home_set.url().path());

        *self.calendar_home_set.lock().unwrap() = Some(home_set.clone());
        Ok(home_set)
    }

    /// Forget the principal and the calendar home set, so that they are discovered again
    pub fn reset_discovery(&self) {
        self.root.invalidate();
        *self.principal.lock().unwrap() = None;
        *self.calendar_home_set.lock().unwrap() = None;
    }

    /// Change the display name of a calendar
    pub async fn rename_calendar(&self, calendar: &RemoteCalendar, new_name: &str) -> Result<RemoteCalendar, DavError> {
        let resource = self.root.resource().with_url(calendar.id().clone());
        set_properties(&resource, &[("d:displayname", new_name.to_string())]).await?;
        log::info!("Renamed calendar {} to {}", calendar.name(), new_name);
        Ok(RemoteCalendar::new(new_name.to_string(), resource, calendar.supported_components()))
    }
}

/// Build a calendar from its properties. Returns `None` for collections that are not task calendars
fn calendar_from_props(href: &str, props: &PropMap, home_set: &Resource) -> Option<RemoteCalendar> {
    let display_name = multistatus::prop_text(props, "displayname")
        .filter(|name| name.is_empty() == false)
        .unwrap_or_else(|| {
            href.trim_end_matches('/').rsplit('/').next().unwrap_or(href).to_string()
        });
    log::debug!("Considering calendar {}", display_name);

    // We filter out non-calendar items
    let is_calendar = props.get("resourcetype")
        .map(|rt| rt.children().any(|child| child.name() == "calendar"))
        .unwrap_or(false);
    if is_calendar == false {
        return None;
    }

    let supported_components = match props.get("supported-calendar-component-set") {
        // Servers are allowed to omit this property, in which case every component is supported
        None => SupportedComponents::EVENT | SupportedComponents::TODO,
        Some(el) => match SupportedComponents::try_from(el.clone()) {
            Err(err) => {
                log::warn!("Calendar {} has invalid supported components ({})! Ignoring it.", display_name, err);
                return None;
            },
            Ok(sc) => sc,
        },
    };
    if supported_components.contains(SupportedComponents::TODO) == false {
        log::debug!("Calendar {} does not support tasks. Ignoring it.", display_name);
        return None;
    }

    let resource = match home_set.join(href) {
        Err(err) => {
            log::warn!("Calendar {} has an invalid URL ({})! Ignoring it.", display_name, err);
            return None;
        },
        Ok(resource) => resource,
    };

    Some(RemoteCalendar::new(display_name, resource, supported_components))
}

#[async_trait]
impl CalDavSource<RemoteCalendar> for Client {
    async fn get_calendars(&self) -> Result<Vec<RemoteCalendar>, DavError> {
        let cal_home_set = self.get_cal_home_set().await?;
        let map = get_properties(&cal_home_set, &CALENDAR_PROPS, 1).await?;

        let own_href = multistatus::resolve_href(&map, cal_home_set.url()).map(|(href, _)| href.to_string());
        let mut calendars: HashMap<CalendarId, RemoteCalendar> = HashMap::new();
        for (href, props) in &map {
            if Some(href) == own_href.as_ref() {
                continue;
            }
            if let Some(calendar) = calendar_from_props(href, props, &cal_home_set) {
                log::info!("Found calendar {}", calendar.name());
                calendars.insert(calendar.id().clone(), calendar);
            }
        }

        let mut calendars: Vec<RemoteCalendar> = calendars.into_iter().map(|(_, cal)| cal).collect();
        calendars.sort_by(|l, r| l.name().cmp(r.name()));
        Ok(calendars)
    }

    async fn create_calendar(&self, name: &str) -> Result<RemoteCalendar, DavError> {
        let cal_home_set = self.get_cal_home_set().await?;
        let mut home_url = cal_home_set.url().clone();
        if home_url.path().ends_with('/') == false {
            let dir = format!("{}/", home_url.path());
            home_url.set_path(&dir);
        }
        let path = format!("{}/", sanitize_filename::sanitize(name));
        let resource = cal_home_set.with_url(home_url).join(&path)
            .map_err(|err| DavError::Consistency(format!("Invalid calendar name {}: {}", name, err)))?;

        let body = MKCALENDAR_BODY.replace("{name}", &escape_xml(name));
        let response = query(&resource, DavMethod::Mkcalendar, Some(body), None, &[]).await?;
        if response.is_not_found() {
            return Err(DavError::NotFound(resource.url().clone()));
        }

        log::info!("Created calendar {} at {}", name, resource.url());
        Ok(RemoteCalendar::new(name.to_string(), resource, SupportedComponents::TODO))
    }
}

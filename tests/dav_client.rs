//! Tests of the CalDAV client against a mocked HTTP server

use dav_task_sync::calendar::remote_calendar::RemoteCalendar;
use dav_task_sync::calendar::SupportedComponents;
use dav_task_sync::client::Client;
use dav_task_sync::error::{DavError, RequestKind};
use dav_task_sync::resource::Resource;
use dav_task_sync::todo::{Todo, VersionTag};
use dav_task_sync::traits::{CalDavSource, DavCalendar};

use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TASKS_PATH: &str = "/dav/calendars/user/tasks/";

fn vtodo(uid: &str, status: Option<&str>) -> String {
    let status = status.map(|s| format!("STATUS:{}\n", s)).unwrap_or_default();
    format!("BEGIN:VCALENDAR\nVERSION:2.0\nPRODID:-//Tests//EN\nBEGIN:VTODO\nUID:{uid}\nDTSTAMP:20210321T001600Z\nSUMMARY:Task {uid}\n{status}END:VTODO\nEND:VCALENDAR\n",
        uid = uid, status = status)
}

fn todo_response(href: &str, etag: &str, data: Option<&str>) -> String {
    let data = data.map(|d| format!("<c:calendar-data>{}</c:calendar-data>", d)).unwrap_or_default();
    format!(r#"<d:response>
    <d:href>{}</d:href>
    <d:propstat>
      <d:prop><d:getetag>{}</d:getetag>{}</d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>"#, href, etag, data)
}

fn multistatus(responses: &[String], sync_token: Option<&str>) -> String {
    let token = sync_token.map(|t| format!("<d:sync-token>{}</d:sync-token>", t)).unwrap_or_default();
    format!(r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  {}
  {}
</d:multistatus>"#, responses.join("\n"), token)
}

fn xml_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(207).set_body_raw(body, "application/xml")
}

/// Principal and calendar home set discovery, and a home set with one task calendar
async fn mount_discovery(server: &MockServer) {
    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .and(header("Depth", "0"))
        .respond_with(xml_response(multistatus(&[r#"<d:response>
    <d:href>/dav/</d:href>
    <d:propstat>
      <d:prop><d:current-user-principal><d:href>/dav/principals/user/</d:href></d:current-user-principal></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>"#.to_string()], None)))
        .mount(server)
        .await;

    Mock::given(method("PROPFIND"))
        .and(path("/dav/principals/user/"))
        .respond_with(xml_response(multistatus(&[r#"<d:response>
    <d:href>/dav/principals/user/</d:href>
    <d:propstat>
      <d:prop><c:calendar-home-set><d:href>/dav/calendars/user/</d:href></c:calendar-home-set></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>"#.to_string()], None)))
        .mount(server)
        .await;

    let collections = [
        r#"<d:response>
    <d:href>/dav/calendars/user/</d:href>
    <d:propstat>
      <d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>"#,
        r#"<d:response>
    <d:href>/dav/calendars/user/tasks/</d:href>
    <d:propstat>
      <d:prop>
        <d:displayname>Tasks</d:displayname>
        <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
        <c:supported-calendar-component-set><c:comp name="VTODO"/></c:supported-calendar-component-set>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>"#,
        r#"<d:response>
    <d:href>/dav/calendars/user/meetings/</d:href>
    <d:propstat>
      <d:prop>
        <d:displayname>Meetings</d:displayname>
        <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
        <c:supported-calendar-component-set><c:comp name="VEVENT"/></c:supported-calendar-component-set>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>"#,
        r#"<d:response>
    <d:href>/dav/calendars/user/inbox/</d:href>
    <d:propstat>
      <d:prop><d:displayname>Inbox</d:displayname><d:resourcetype><d:collection/></d:resourcetype></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>"#,
    ];
    Mock::given(method("PROPFIND"))
        .and(path("/dav/calendars/user/"))
        .and(header("Depth", "1"))
        .respond_with(xml_response(multistatus(&collections.iter().map(|c| c.to_string()).collect::<Vec<_>>(), None)))
        .mount(server)
        .await;
}

fn tasks_calendar(server: &MockServer) -> RemoteCalendar {
    let url = format!("{}{}", server.uri(), TASKS_PATH).parse().unwrap();
    RemoteCalendar::new("Tasks".to_string(), Resource::new(url, "user".to_string(), "pass".to_string()), SupportedComponents::TODO)
}


#[tokio::test]
async fn test_discovery() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = MockServer::start().await;
    mount_discovery(&server).await;

    let client = Client::new(format!("{}/dav/", server.uri()), "user", "pass").unwrap();
    let calendars = client.get_calendars().await.unwrap();

    // The home set itself, the event calendar and the plain collection are not task calendars
    assert_eq!(calendars.len(), 1);
    assert_eq!(calendars[0].name(), "Tasks");
    assert_eq!(calendars[0].id().path(), TASKS_PATH);
    assert!(calendars[0].supported_components().contains(SupportedComponents::TODO));
}

#[tokio::test]
async fn test_unauthorized() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = Client::new(format!("{}/dav/", server.uri()), "user", "wrong").unwrap();
    let err = client.get_calendars().await.unwrap_err();
    assert!(err.is_authorization());
}

#[tokio::test]
async fn test_create_calendar() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("MKCALENDAR"))
        .and(path("/dav/calendars/user/Groceries/"))
        .and(body_string_contains("<d:displayname>Groceries</d:displayname>"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new(format!("{}/dav/", server.uri()), "user", "pass").unwrap();
    let calendar = client.create_calendar("Groceries").await.unwrap();
    assert_eq!(calendar.name(), "Groceries");
    assert_eq!(calendar.id().path(), "/dav/calendars/user/Groceries/");
}

#[tokio::test]
async fn test_pending_tasks_are_merged() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = MockServer::start().await;

    let open = [
        todo_response("/dav/calendars/user/tasks/a.ics", "\"1\"", Some(&vtodo("a", Some("NEEDS-ACTION")))),
        // This server does not filter negated conditions
        todo_response("/dav/calendars/user/tasks/c.ics", "\"3\"", Some(&vtodo("c", Some("COMPLETED")))),
    ];
    Mock::given(method("REPORT"))
        .and(path(TASKS_PATH))
        .and(body_string_contains("negate-condition"))
        .respond_with(xml_response(multistatus(&open, None)))
        .mount(&server)
        .await;

    let no_status = [
        todo_response("/dav/calendars/user/tasks/a.ics", "\"1\"", Some(&vtodo("a", Some("NEEDS-ACTION")))),
        todo_response("/dav/calendars/user/tasks/b.ics", "\"2\"", Some(&vtodo("b", None))),
    ];
    Mock::given(method("REPORT"))
        .and(path(TASKS_PATH))
        .and(body_string_contains("is-not-defined"))
        .respond_with(xml_response(multistatus(&no_status, None)))
        .mount(&server)
        .await;

    let calendar = tasks_calendar(&server);
    let pending = calendar.list_pending().await.unwrap();
    let uids: Vec<&str> = pending.iter().map(|t| t.uid()).collect();
    assert_eq!(uids.len(), 2);
    assert!(uids.contains(&"a"));
    assert!(uids.contains(&"b"));

    let a = pending.iter().find(|t| t.uid() == "a").unwrap();
    assert_eq!(a.version_tag(), Some(&VersionTag::from("\"1\"".to_string())));
    assert_eq!(a.href().path(), "/dav/calendars/user/tasks/a.ics");
}

#[tokio::test]
async fn test_fetch_by_uid() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = MockServer::start().await;

    // text-match is a substring match
    Mock::given(method("REPORT"))
        .and(path(TASKS_PATH))
        .and(body_string_contains(">abc<"))
        .respond_with(xml_response(multistatus(&[
            todo_response("/dav/calendars/user/tasks/abc-2.ics", "\"1\"", Some(&vtodo("abc-2", None))),
        ], None)))
        .mount(&server)
        .await;
    Mock::given(method("REPORT"))
        .and(path(TASKS_PATH))
        .and(body_string_contains(">gone<"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let calendar = tasks_calendar(&server);
    assert!(calendar.fetch_by_uid("abc").await.unwrap().is_none());
    assert!(calendar.fetch_by_uid("gone").await.unwrap().is_none());
}

#[tokio::test]
async fn test_conditional_writes() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/dav/calendars/user/tasks/new-task.ics"))
        .and(header("If-None-Match", "*"))
        .respond_with(ResponseTemplate::new(201).insert_header("ETag", "\"e1\""))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/dav/calendars/user/tasks/new-task.ics"))
        .and(header("If-Match", "\"e1\""))
        .respond_with(ResponseTemplate::new(412))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/dav/calendars/user/tasks/new-task.ics"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let calendar = tasks_calendar(&server);
    let mut todo = Todo::new("new-task", calendar.id());
    todo.props_mut().set_text("SUMMARY", "New task");

    let created = calendar.create(&todo).await.unwrap();
    assert_eq!(created.version_tag().map(|t| t.as_str()), Some("\"e1\""));

    match calendar.update(&created).await {
        Err(DavError::Protocol{ kind, status, .. }) => {
            assert_eq!(kind, RequestKind::Creation);
            assert_eq!(status, 412);
        },
        other => panic!("Unexpected result {:?}", other),
    }

    // Deleting a resource that is already gone is fine
    calendar.delete(&created).await.unwrap();
}

#[tokio::test]
async fn test_rejected_sync_token() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = MockServer::start().await;

    Mock::given(method("REPORT"))
        .and(path(TASKS_PATH))
        .and(body_string_contains("<d:sync-token>expired</d:sync-token>"))
        .respond_with(ResponseTemplate::new(403).set_body_raw(
            r#"<?xml version="1.0" encoding="utf-8"?><d:error xmlns:d="DAV:"><d:valid-sync-token/></d:error>"#,
            "application/xml",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let listing = [
        todo_response("/dav/calendars/user/tasks/a.ics", "\"1\"", None),
        r#"<d:response>
    <d:href>/dav/calendars/user/tasks/removed.ics</d:href>
    <d:status>HTTP/1.1 404 Not Found</d:status>
  </d:response>"#.to_string(),
    ];
    Mock::given(method("REPORT"))
        .and(path(TASKS_PATH))
        .and(body_string_contains("<d:sync-token></d:sync-token>"))
        .respond_with(xml_response(multistatus(&listing, Some("http://example.com/sync/2"))))
        .expect(1)
        .mount(&server)
        .await;

    let calendar = tasks_calendar(&server);
    let delta = calendar.list_incremental(Some("expired"), false).await.unwrap();
    assert_eq!(delta.token.as_deref(), Some("http://example.com/sync/2"));
    assert!(delta.loaded.is_empty());
    assert_eq!(delta.stubs.len(), 1);
    assert_eq!(delta.stubs[0].href.path(), "/dav/calendars/user/tasks/a.ics");
    assert_eq!(delta.removed.len(), 1);
    assert_eq!(delta.removed[0].path(), "/dav/calendars/user/tasks/removed.ics");
}

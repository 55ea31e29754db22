use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, ROOT_ID};
use tower::{Service, ServiceExt};

const ENTRY: &str = "application/atom+xml;type=entry";
const NS: &str = r#"xmlns:atom="http://www.w3.org/2005/Atom" xmlns:cmis="http://docs.oasis-open.org/ns/cmis/core/200908/" xmlns:cmisra="http://docs.oasis-open.org/ns/cmis/restatom/200908/""#;

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

fn delete(uri: &str) -> Request<String> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(String::new())
        .unwrap()
}

fn post(uri: &str, content_type: &str, body: String) -> Request<String> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(body)
        .unwrap()
}

fn new_object(type_id: &str, name: &str) -> String {
    format!(
        r#"<atom:entry {NS}><atom:title>{name}</atom:title><cmisra:object><cmis:properties><cmis:propertyId propertyDefinitionId="cmis:objectTypeId"><cmis:value>{type_id}</cmis:value></cmis:propertyId><cmis:propertyString propertyDefinitionId="cmis:name"><cmis:value>{name}</cmis:value></cmis:propertyString></cmis:properties></cmisra:object></atom:entry>"#
    )
}

fn query(statement: &str) -> String {
    format!(
        r#"<cmis:query xmlns:cmis="http://docs.oasis-open.org/ns/cmis/core/200908/"><cmis:statement>{statement}</cmis:statement><cmis:searchAllVersions>false</cmis:searchAllVersions></cmis:query>"#
    )
}

fn created_id(response: &axum::response::Response) -> String {
    let location = response.headers()[http::header::LOCATION].to_str().unwrap();
    location.rsplit('/').next().unwrap().to_string()
}

// --- discovery ---

#[tokio::test]
async fn service_document_uses_host_header() {
    let resp = app()
        .oneshot(
            Request::builder()
                .uri("/cmis")
                .header(http::header::HOST, "repo.test:8080")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[http::header::CONTENT_TYPE],
        "application/atomsvc+xml"
    );
    let body = body_text(resp).await;
    assert!(body.contains(r#"href="http://repo.test:8080/children/root""#));
    assert!(body.contains("<cmisra:type>objectbypath</cmisra:type>"));
}

#[tokio::test]
async fn root_resolves_by_path() {
    let resp = app().oneshot(get("/path?path=/")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_text(resp).await;
    assert!(body.contains(&format!("<cmis:value>{ROOT_ID}</cmis:value>")));
}

// --- errors ---

#[tokio::test]
async fn unknown_object_is_404_with_text_body() {
    let resp = app().oneshot(get("/objects?id=missing")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(body_text(resp).await.contains("missing"));
}

#[tokio::test]
async fn invalid_query_is_400() {
    let resp = app()
        .oneshot(post(
            "/query",
            "application/cmisquery+xml",
            query("SELECT * FORM cmis:document"),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(resp).await.contains("FORM"));
}

#[tokio::test]
async fn create_without_type_is_400() {
    let body = format!(r#"<atom:entry {NS}><atom:title>x</atom:title></atom:entry>"#);
    let resp = app()
        .oneshot(post("/children/root", ENTRY, body))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn root_cannot_be_deleted() {
    let resp = app().oneshot(delete("/entries/root")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

// --- lifecycle ---

#[tokio::test]
async fn folder_lifecycle() {
    let mut app = app().into_service();

    // create
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(post("/children/root", ENTRY, new_object("cmis:folder", "Demo")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let folder = created_id(&resp);
    assert!(body_text(resp).await.contains("<cmis:value>/Demo</cmis:value>"));

    // same name again
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(post("/children/root", ENTRY, new_object("cmis:folder", "Demo")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // document inside
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(post(
            &format!("/children/{folder}"),
            ENTRY,
            new_object("cmis:document", "a.txt"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    // children feed
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(get(&format!("/children/{folder}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_text(resp).await;
    assert!(body.contains("<cmisra:numItems>1</cmisra:numItems>"));
    assert!(body.contains("<atom:title>a.txt</atom:title>"));

    // non-empty folder
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(delete(&format!("/entries/{folder}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // whole tree
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(delete(&format!("/tree/{folder}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(get(&format!("/entries/{folder}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn multipart_document_keeps_content() {
    let mut app = app().into_service();

    let boundary = "b0";
    let entry = new_object("cmis:document", "notes.txt");
    let body = format!(
        "--{boundary}\r\nContent-Type: {ENTRY}\r\n\r\n{entry}\r\n--{boundary}\r\nContent-Type: text/plain\r\nContent-ID: <content>\r\n\r\nhello\r\n--{boundary}--\r\n"
    );
    let content_type = format!(r#"multipart/related; type="{ENTRY}"; boundary="{boundary}""#);
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(post("/children/root", &content_type, body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let id = created_id(&resp);

    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(get(&format!("/content/{id}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[http::header::CONTENT_TYPE], "text/plain");
    assert_eq!(body_text(resp).await, "hello");
}

#[tokio::test]
async fn query_projects_columns() {
    let mut app = app().into_service();

    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(post("/children/root", ENTRY, new_object("cmis:document", "q.txt")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(post(
            "/query",
            "application/cmisquery+xml",
            query("SELECT cmis:name FROM cmis:document WHERE cmis:name = 'q.txt'"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_text(resp).await;
    assert!(body.contains("<cmisra:numItems>1</cmisra:numItems>"));
    assert!(body.contains(r#"queryName="cmis:name"><cmis:value>q.txt</cmis:value>"#));
    assert!(!body.contains("cmis:objectId"));
}

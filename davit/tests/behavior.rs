//! End-to-end scenarios driven through the dispatcher against the
//! in-memory backend, one connectionless request at a time.

use std::sync::Arc;

use http::{HeaderMap, Request, StatusCode};
use http_body_util::BodyExt;

use davit::memtree::MemTree;
use davit_proto::codec::{self, HttpRequest};
use davit_proto::DavServer;

fn server() -> Arc<DavServer> {
    server_with("/", false)
}

fn server_with(base_uri: &str, extended_mkcol: bool) -> Arc<DavServer> {
    let tree = MemTree::with_options(extended_mkcol, 1 << 20);
    let staging = std::env::temp_dir().join("davit-behavior-staging");
    Arc::new(DavServer::new(Arc::new(tree), base_uri, staging))
}

fn request(
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: &'static str,
) -> HttpRequest {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(codec::text_body(body)).unwrap()
}

async fn exec(
    srv: &Arc<DavServer>,
    req: HttpRequest,
) -> (StatusCode, HeaderMap, String) {
    let response = srv.handle(req).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    (
        parts.status,
        parts.headers,
        String::from_utf8_lossy(&bytes).into_owned(),
    )
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .unwrap_or_else(|| panic!("missing header {}", name))
        .to_str()
        .unwrap()
}

#[tokio::test]
async fn propfind_depth_zero_on_root() {
    let srv = server();
    let (status, _, body) = exec(&srv, request("PROPFIND", "/", &[("Depth", "0")], "")).await;

    assert_eq!(status.as_u16(), 207);
    assert_eq!(body.matches("<d:response>").count(), 1);
    assert!(body.contains("<d:href>/</d:href>"));
    assert!(body.contains("<d:resourcetype>"));
    assert!(body.contains("<d:collection/>"));
    // the in-memory backend reports quota numbers
    assert!(body.contains("<d:quota-used-bytes>0</d:quota-used-bytes>"));
}

#[tokio::test]
async fn get_with_byte_range() {
    let srv = server();
    let (status, _, _) = exec(&srv, request("PUT", "/range.txt", &[], "abcdefghij")).await;
    assert_eq!(status.as_u16(), 201);

    let (status, headers, body) = exec(
        &srv,
        request("GET", "/range.txt", &[("Range", "bytes=0-4")], ""),
    )
    .await;
    assert_eq!(status.as_u16(), 206);
    assert_eq!(header(&headers, "Content-Range"), "bytes 0-4/10");
    assert_eq!(header(&headers, "Content-Length"), "5");
    assert_eq!(body, "abcde");
}

#[tokio::test]
async fn get_with_suffix_and_open_ranges() {
    let srv = server();
    exec(&srv, request("PUT", "/range.txt", &[], "abcdefghij")).await;

    let (status, headers, body) = exec(
        &srv,
        request("GET", "/range.txt", &[("Range", "bytes=-3")], ""),
    )
    .await;
    assert_eq!(status.as_u16(), 206);
    assert_eq!(header(&headers, "Content-Range"), "bytes 7-9/10");
    assert_eq!(body, "hij");

    let (status, headers, body) = exec(
        &srv,
        request("GET", "/range.txt", &[("Range", "bytes=5-")], ""),
    )
    .await;
    assert_eq!(status.as_u16(), 206);
    assert_eq!(header(&headers, "Content-Range"), "bytes 5-9/10");
    assert_eq!(body, "fghij");
}

#[tokio::test]
async fn range_outside_the_entity_is_rejected() {
    let srv = server();
    exec(&srv, request("PUT", "/range.txt", &[], "abcdefghij")).await;

    let (status, _, body) = exec(
        &srv,
        request("GET", "/range.txt", &[("Range", "bytes=20-")], ""),
    )
    .await;
    assert_eq!(status.as_u16(), 416);
    assert!(body.contains("RequestedRangeNotSatisfiable"));
}

#[tokio::test]
async fn put_creates_then_get_returns_the_body() {
    let srv = server();
    let (status, headers, _) = exec(&srv, request("PUT", "/new.txt", &[], "hi")).await;
    assert_eq!(status.as_u16(), 201);
    assert_eq!(header(&headers, "Content-Length"), "0");

    let (status, headers, body) = exec(&srv, request("GET", "/new.txt", &[], "")).await;
    assert_eq!(status.as_u16(), 200);
    assert_eq!(body, "hi");
    // no stored content type: the default applies
    assert_eq!(header(&headers, "Content-Type"), "application/octet-stream");
}

#[tokio::test]
async fn put_on_a_collection_is_a_conflict() {
    let srv = server();
    exec(&srv, request("MKCOL", "/col", &[], "")).await;

    let (status, _, body) = exec(&srv, request("PUT", "/col", &[], "data")).await;
    assert_eq!(status.as_u16(), 409);
    assert!(body.contains("PUT is not allowed on non-files"));
}

#[tokio::test]
async fn move_without_overwrite_leaves_both_paths_alone() {
    let srv = server();
    exec(&srv, request("PUT", "/a", &[], "AAA")).await;
    exec(&srv, request("PUT", "/b", &[], "BBB")).await;

    let (status, _, _) = exec(
        &srv,
        request(
            "MOVE",
            "/a",
            &[("Destination", "/b"), ("Overwrite", "F")],
            "",
        ),
    )
    .await;
    assert_eq!(status.as_u16(), 412);

    let (_, _, a) = exec(&srv, request("GET", "/a", &[], "")).await;
    let (_, _, b) = exec(&srv, request("GET", "/b", &[], "")).await;
    assert_eq!(a, "AAA");
    assert_eq!(b, "BBB");
}

#[tokio::test]
async fn move_with_overwrite_replaces_the_destination() {
    let srv = server();
    exec(&srv, request("PUT", "/a", &[], "AAA")).await;
    exec(&srv, request("PUT", "/b", &[], "BBB")).await;

    let (status, _, _) = exec(
        &srv,
        request("MOVE", "/a", &[("Destination", "/b")], ""),
    )
    .await;
    assert_eq!(status.as_u16(), 204);

    let (status, _, _) = exec(&srv, request("GET", "/a", &[], "")).await;
    assert_eq!(status.as_u16(), 404);
    let (_, _, b) = exec(&srv, request("GET", "/b", &[], "")).await;
    assert_eq!(b, "AAA");
}

#[tokio::test]
async fn copy_to_a_fresh_destination() {
    let srv = server();
    exec(&srv, request("PUT", "/src.txt", &[], "payload")).await;

    let (status, _, _) = exec(
        &srv,
        request("COPY", "/src.txt", &[("Destination", "/dst.txt")], ""),
    )
    .await;
    assert_eq!(status.as_u16(), 201);

    let (_, _, src) = exec(&srv, request("GET", "/src.txt", &[], "")).await;
    let (_, _, dst) = exec(&srv, request("GET", "/dst.txt", &[], "")).await;
    assert_eq!(src, "payload");
    assert_eq!(dst, "payload");
}

#[tokio::test]
async fn copy_without_destination_is_a_bad_request() {
    let srv = server();
    exec(&srv, request("PUT", "/src.txt", &[], "payload")).await;

    let (status, _, body) = exec(&srv, request("COPY", "/src.txt", &[], "")).await;
    assert_eq!(status.as_u16(), 400);
    assert!(body.contains("destination header"));
}

#[tokio::test]
async fn mkcol_with_empty_body_then_propfind_lists_it() {
    let srv = server();
    let (status, _, _) = exec(&srv, request("MKCOL", "/sub", &[], "")).await;
    assert_eq!(status.as_u16(), 201);

    exec(&srv, request("PUT", "/file.txt", &[], "x")).await;

    let (status, _, body) = exec(&srv, request("PROPFIND", "/", &[("Depth", "1")], "")).await;
    assert_eq!(status.as_u16(), 207);
    // collection hrefs end with a slash, file hrefs do not
    assert!(body.contains("<d:href>/sub/</d:href>"));
    assert!(body.contains("<d:href>/file.txt</d:href>"));
}

#[tokio::test]
async fn mkcol_on_an_existing_resource_is_not_allowed() {
    let srv = server();
    exec(&srv, request("MKCOL", "/sub", &[], "")).await;
    let (status, _, _) = exec(&srv, request("MKCOL", "/sub", &[], "")).await;
    assert_eq!(status.as_u16(), 405);
}

#[tokio::test]
async fn mkcol_requires_an_xml_content_type() {
    let srv = server();
    let (status, _, _) = exec(
        &srv,
        request(
            "MKCOL",
            "/sub",
            &[("Content-Type", "text/plain")],
            "not xml",
        ),
    )
    .await;
    assert_eq!(status.as_u16(), 415);
}

#[tokio::test]
async fn mkcol_with_foreign_resourcetype_is_rejected_without_extension() {
    let srv = server();
    let body = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:mkcol xmlns:D="DAV:" xmlns:E="http://example.com/ns/">
    <D:set>
        <D:prop>
            <D:resourcetype><D:collection/><E:special/></D:resourcetype>
        </D:prop>
    </D:set>
</D:mkcol>"#;
    let (status, _, xml) = exec(
        &srv,
        request("MKCOL", "/special", &[("Content-Type", "application/xml")], body),
    )
    .await;
    assert_eq!(status.as_u16(), 422);
    assert!(xml.contains("<d:valid-resourcetype/>"));

    let (status, _, _) = exec(&srv, request("PROPFIND", "/special", &[("Depth", "0")], "")).await;
    assert_eq!(status.as_u16(), 404);
}

#[tokio::test]
async fn mkcol_with_properties_on_a_plain_tree() {
    let srv = server();
    let body = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:mkcol xmlns:D="DAV:">
    <D:set>
        <D:prop>
            <D:resourcetype><D:collection/></D:resourcetype>
            <D:displayname>Plain Resource</D:displayname>
        </D:prop>
    </D:set>
</D:mkcol>"#;
    let (status, _, _) = exec(
        &srv,
        request("MKCOL", "/plain", &[("Content-Type", "application/xml")], body),
    )
    .await;
    assert_eq!(status.as_u16(), 201);

    let propfind = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:"><D:prop><D:displayname/></D:prop></D:propfind>"#;
    let (_, _, body) = exec(
        &srv,
        request("PROPFIND", "/plain", &[("Depth", "0")], propfind),
    )
    .await;
    assert!(body.contains("<d:displayname>Plain Resource</d:displayname>"));
}

#[tokio::test]
async fn extended_mkcol_applies_properties_atomically() {
    let srv = server_with("/", true);
    let body = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:mkcol xmlns:D="DAV:">
    <D:set>
        <D:prop>
            <D:resourcetype><D:collection/></D:resourcetype>
            <D:displayname>Special Resource</D:displayname>
        </D:prop>
    </D:set>
</D:mkcol>"#;
    let (status, _, _) = exec(
        &srv,
        request("MKCOL", "/special", &[("Content-Type", "application/xml")], body),
    )
    .await;
    assert_eq!(status.as_u16(), 201);

    let propfind = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:"><D:prop><D:displayname/></D:prop></D:propfind>"#;
    let (_, _, body) = exec(
        &srv,
        request("PROPFIND", "/special", &[("Depth", "0")], propfind),
    )
    .await;
    assert!(body.contains("<d:displayname>Special Resource</d:displayname>"));
    assert!(body.contains("HTTP/1.1 200 OK"));
}

#[tokio::test]
async fn proppatch_on_a_protected_property_is_atomically_rejected() {
    let srv = server();
    let body = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propertyupdate xmlns:D="DAV:">
    <D:set>
        <D:prop>
            <D:displayname>Shared files</D:displayname>
            <D:getetag>"forged"</D:getetag>
        </D:prop>
    </D:set>
</D:propertyupdate>"#;
    let (status, _, xml) = exec(&srv, request("PROPPATCH", "/", &[], body)).await;
    assert_eq!(status.as_u16(), 207);
    assert!(xml.contains("HTTP/1.1 403 Forbidden"));
    assert!(xml.contains("<d:getetag/>"));
    // the untouched candidate reports a failed dependency
    assert!(xml.contains("HTTP/1.1 424 Failed Dependency"));
    assert!(xml.contains("<d:displayname/>"));

    // nothing was persisted
    let propfind = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:"><D:prop><D:displayname/></D:prop></D:propfind>"#;
    let (_, _, body) = exec(&srv, request("PROPFIND", "/", &[("Depth", "0")], propfind)).await;
    assert!(body.contains("HTTP/1.1 404 Not Found"));
}

#[tokio::test]
async fn proppatch_persists_dead_properties() {
    let srv = server();
    let body = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propertyupdate xmlns:D="DAV:" xmlns:Z="http://ns.example.com/z/">
    <D:set>
        <D:prop>
            <D:displayname>Shared files</D:displayname>
            <Z:authors>Jim</Z:authors>
        </D:prop>
    </D:set>
</D:propertyupdate>"#;
    let (status, _, xml) = exec(&srv, request("PROPPATCH", "/", &[], body)).await;
    assert_eq!(status.as_u16(), 207);
    assert!(xml.contains("HTTP/1.1 200 OK"));

    let propfind = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:" xmlns:Z="http://ns.example.com/z/">
    <D:prop><D:displayname/><Z:authors/></D:prop>
</D:propfind>"#;
    let (_, _, body) = exec(&srv, request("PROPFIND", "/", &[("Depth", "0")], propfind)).await;
    assert!(body.contains("<d:displayname>Shared files</d:displayname>"));
    assert!(body.contains(">Jim</custom:authors>"));
}

#[tokio::test]
async fn delete_removes_the_node() {
    let srv = server();
    exec(&srv, request("PUT", "/gone.txt", &[], "x")).await;

    let (status, headers, _) = exec(&srv, request("DELETE", "/gone.txt", &[], "")).await;
    assert_eq!(status.as_u16(), 204);
    assert_eq!(header(&headers, "Content-Length"), "0");

    let (status, _, _) = exec(&srv, request("GET", "/gone.txt", &[], "")).await;
    assert_eq!(status.as_u16(), 404);
}

#[tokio::test]
async fn options_advertises_the_dav_surface() {
    let srv = server();
    let (status, headers, body) = exec(&srv, request("OPTIONS", "/", &[], "")).await;
    assert_eq!(status.as_u16(), 200);
    assert!(body.is_empty());
    assert_eq!(header(&headers, "DAV"), "1,3,extended-mkcol");
    assert_eq!(header(&headers, "MS-Author-Via"), "DAV");
    assert_eq!(header(&headers, "Accept-Ranges"), "bytes");
    // the root is mapped: it cannot be MKCOLed
    assert!(!header(&headers, "Allow").contains("MKCOL"));

    let (_, headers, _) = exec(&srv, request("OPTIONS", "/missing", &[], "")).await;
    assert!(header(&headers, "Allow").contains("MKCOL"));
}

#[tokio::test]
async fn conditional_put_with_if_match() {
    let srv = server();
    exec(&srv, request("PUT", "/c.txt", &[], "v1")).await;

    // the in-memory backend derives etags from version and length
    let (status, _, _) = exec(
        &srv,
        request("PUT", "/c.txt", &[("If-Match", "\"wrong\"")], "v2"),
    )
    .await;
    assert_eq!(status.as_u16(), 412);
    let (_, _, body) = exec(&srv, request("GET", "/c.txt", &[], "")).await;
    assert_eq!(body, "v1");

    let (status, _, _) = exec(
        &srv,
        request("PUT", "/c.txt", &[("If-Match", "\"0-2\"")], "v2"),
    )
    .await;
    assert_eq!(status.as_u16(), 200);
    let (_, _, body) = exec(&srv, request("GET", "/c.txt", &[], "")).await;
    assert_eq!(body, "v2");
}

#[tokio::test]
async fn get_with_if_none_match_star_redirects() {
    let srv = server();
    exec(&srv, request("PUT", "/d.txt", &[], "x")).await;

    let (status, _, body) = exec(
        &srv,
        request("GET", "/d.txt", &[("If-None-Match", "*")], ""),
    )
    .await;
    assert_eq!(status.as_u16(), 304);
    assert!(body.is_empty());
}

#[tokio::test]
async fn head_mirrors_get_headers_for_files() {
    let srv = server();
    exec(&srv, request("PUT", "/h.txt", &[], "abcd")).await;

    let (status, headers, body) = exec(&srv, request("HEAD", "/h.txt", &[], "")).await;
    assert_eq!(status.as_u16(), 200);
    assert!(body.is_empty());
    assert_eq!(header(&headers, "Content-Length"), "4");
    assert!(headers.contains_key("ETag"));
    assert!(headers.contains_key("Last-Modified"));
}

#[tokio::test]
async fn head_on_a_collection_answers_bare_200() {
    let srv = server();
    let (status, headers, body) = exec(&srv, request("HEAD", "/", &[], "")).await;
    assert_eq!(status.as_u16(), 200);
    assert!(body.is_empty());
    assert!(!headers.contains_key("ETag"));
}

#[tokio::test]
async fn propfind_depth_infinity_is_clamped_to_one() {
    let srv = server();
    exec(&srv, request("MKCOL", "/sub", &[], "")).await;
    exec(&srv, request("PUT", "/sub/leaf.txt", &[], "x")).await;

    let (status, _, body) = exec(
        &srv,
        request("PROPFIND", "/", &[("Depth", "infinity")], ""),
    )
    .await;
    assert_eq!(status.as_u16(), 207);
    assert!(body.contains("<d:href>/sub/</d:href>"));
    assert!(!body.contains("leaf.txt"));
}

#[tokio::test]
async fn report_without_a_subscriber_is_not_implemented() {
    let srv = server();
    let body = r#"<?xml version="1.0" encoding="utf-8" ?>
<C:calendar-multiget xmlns:C="urn:ietf:params:xml:ns:caldav" xmlns:D="DAV:">
    <D:href>/x</D:href>
</C:calendar-multiget>"#;
    let (status, _, xml) = exec(&srv, request("REPORT", "/", &[], body)).await;
    assert_eq!(status.as_u16(), 501);
    assert!(xml.contains("ReportNotImplemented"));
    assert!(xml.contains("calendar-multiget"));
}

#[tokio::test]
async fn unknown_methods_route_to_501() {
    let srv = server();
    let (status, _, xml) = exec(&srv, request("BREW", "/", &[], "")).await;
    assert_eq!(status.as_u16(), 501);
    assert!(xml.contains("NotImplemented"));
}

#[tokio::test]
async fn requests_outside_the_base_uri_are_forbidden() {
    let srv = server_with("/dav/", false);
    let (status, _, xml) = exec(&srv, request("GET", "/other/x", &[], "")).await;
    assert_eq!(status.as_u16(), 403);
    assert!(xml.contains("<a:exception>Forbidden</a:exception>"));

    // the bare base uri without its trailing slash maps to the root
    let (status, _, _) = exec(&srv, request("PROPFIND", "/dav", &[("Depth", "0")], "")).await;
    assert_eq!(status.as_u16(), 207);
}

#[tokio::test]
async fn every_response_carries_the_version_header() {
    let srv = server();
    let (_, headers, _) = exec(&srv, request("OPTIONS", "/", &[], "")).await;
    assert!(headers.contains_key("X-Davit-Version"));

    let (_, headers, _) = exec(&srv, request("GET", "/missing", &[], "")).await;
    assert!(headers.contains_key("X-Davit-Version"));
}

#[tokio::test]
async fn error_responses_carry_the_xml_envelope() {
    let srv = server();
    let (status, headers, xml) = exec(&srv, request("GET", "/missing", &[], "")).await;
    assert_eq!(status.as_u16(), 404);
    assert_eq!(
        header(&headers, "Content-Type"),
        "application/xml; charset=utf-8"
    );
    assert!(xml.contains("<d:error"));
    assert!(xml.contains("<a:exception>NotFound</a:exception>"));
    assert!(xml.contains("<a:davit-version>"));
}

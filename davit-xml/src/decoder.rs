use quick_xml::events::Event;

use super::error::ParsingError;
use super::name::{QName, DAV_URN};
use super::types::*;
use super::xml::{IRead, QRead, Reader};

/// Collect the Clark names of the children of the currently open element,
/// ignoring their content.
async fn read_names(xml: &mut Reader<impl IRead>) -> Result<Vec<QName>, ParsingError> {
    let mut names = vec![];
    loop {
        match xml.open_any().await {
            Ok(name) => {
                names.push(name);
                xml.close().await?;
            }
            Err(ParsingError::Recoverable) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(names)
}

/// Parse the body of the currently open property element according to the
/// registered shape of its value. The caller closes the element.
async fn read_value(
    xml: &mut Reader<impl IRead>,
    kind: ValueKind,
) -> Result<Value, ParsingError> {
    match kind {
        ValueKind::Text => Ok(Value::Text(xml.tag_string().await?)),
        ValueKind::QNames => Ok(Value::QNames(read_names(xml).await?)),
        ValueKind::Href => {
            if xml.maybe_open(DAV_URN, "href").await?.is_some() {
                let url = xml.tag_string().await?;
                xml.close().await?;
                Ok(Value::Href(Href(url.trim().to_string())))
            } else {
                Ok(Value::Href(Href(xml.tag_string().await?.trim().to_string())))
            }
        }
        ValueKind::Date => {
            let raw = xml.tag_string().await?;
            let date = chrono::DateTime::parse_from_rfc2822(raw.trim())?;
            Ok(Value::Date(date.with_timezone(&chrono::Utc)))
        }
    }
}

/// PROPFIND request
impl QRead<PropFind> for PropFind {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "propfind").await?;
        if !xml.parent_has_child() {
            xml.close().await?;
            return Ok(PropFind::AllProp(None));
        }
        let propfind = loop {
            // allprop
            if xml.maybe_open(DAV_URN, "allprop").await?.is_some() {
                xml.close().await?;
                let mut include = None;
                loop {
                    if xml.maybe_open(DAV_URN, "include").await?.is_some() {
                        include = Some(read_names(xml).await?);
                        xml.close().await?;
                        break;
                    }
                    match xml.peek() {
                        Event::End(_) => break,
                        _ => {
                            xml.skip().await?;
                        }
                    }
                }
                break PropFind::AllProp(include);
            }

            // propname
            if xml.maybe_open(DAV_URN, "propname").await?.is_some() {
                xml.close().await?;
                break PropFind::PropName;
            }

            // prop
            if xml.maybe_open(DAV_URN, "prop").await?.is_some() {
                let names = read_names(xml).await?;
                xml.close().await?;
                break PropFind::Prop(names);
            }

            // not found, skipping
            xml.skip().await?;
        };
        xml.close().await?;

        Ok(propfind)
    }
}

/// PROPPATCH request
impl PropertyUpdate {
    pub async fn read_with(
        xml: &mut Reader<impl IRead>,
        registry: &PropertyRegistry,
    ) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "propertyupdate").await?;
        let mut items = vec![];
        while xml.parent_has_child() {
            if xml.maybe_open(DAV_URN, "set").await?.is_some() {
                if xml.maybe_open(DAV_URN, "prop").await?.is_some() {
                    loop {
                        match xml.open_any().await {
                            Ok(name) => {
                                let value = read_value(xml, registry.kind_of(&name)).await?;
                                xml.close().await?;
                                items.push(PropertyUpdateItem::Set(name, value));
                            }
                            Err(ParsingError::Recoverable) => break,
                            Err(e) => return Err(e),
                        }
                    }
                    xml.close().await?;
                }
                xml.close().await?;
                continue;
            }

            if xml.maybe_open(DAV_URN, "remove").await?.is_some() {
                if xml.maybe_open(DAV_URN, "prop").await?.is_some() {
                    loop {
                        match xml.open_any().await {
                            Ok(name) => {
                                xml.close().await?;
                                items.push(PropertyUpdateItem::Remove(name));
                            }
                            Err(ParsingError::Recoverable) => break,
                            Err(e) => return Err(e),
                        }
                    }
                    xml.close().await?;
                }
                xml.close().await?;
                continue;
            }

            match xml.peek() {
                Event::End(_) => break,
                _ => {
                    xml.skip().await?;
                }
            }
        }
        xml.close().await?;
        Ok(PropertyUpdate(items))
    }

    /// Like [`Reader::find`], but threading the property registry through.
    pub async fn find_with(
        xml: &mut Reader<impl IRead>,
        registry: &PropertyRegistry,
    ) -> Result<Self, ParsingError> {
        loop {
            match Self::read_with(xml, registry).await {
                Err(ParsingError::Recoverable) => {
                    xml.skip().await?;
                }
                otherwise => return otherwise,
            }
        }
    }
}

/// Extended MKCOL request
impl Mkcol {
    pub async fn read_with(
        xml: &mut Reader<impl IRead>,
        registry: &PropertyRegistry,
    ) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "mkcol").await?;
        let mut props = vec![];
        while xml.parent_has_child() {
            if xml.maybe_open(DAV_URN, "set").await?.is_some() {
                if xml.maybe_open(DAV_URN, "prop").await?.is_some() {
                    loop {
                        match xml.open_any().await {
                            Ok(name) => {
                                let value = read_value(xml, registry.kind_of(&name)).await?;
                                xml.close().await?;
                                props.push((name, value));
                            }
                            Err(ParsingError::Recoverable) => break,
                            Err(e) => return Err(e),
                        }
                    }
                    xml.close().await?;
                }
                xml.close().await?;
                continue;
            }

            match xml.peek() {
                Event::End(_) => break,
                _ => {
                    xml.skip().await?;
                }
            }
        }
        xml.close().await?;
        Ok(Mkcol { props })
    }

    pub async fn find_with(
        xml: &mut Reader<impl IRead>,
        registry: &PropertyRegistry,
    ) -> Result<Self, ParsingError> {
        loop {
            match Self::read_with(xml, registry).await {
                Err(ParsingError::Recoverable) => {
                    xml.skip().await?;
                }
                otherwise => return otherwise,
            }
        }
    }
}

/// REPORT request
///
/// The root element is whatever the client sent; its Clark name selects the
/// report and the children are captured shallowly for the plugin that will
/// serve it.
impl QRead<ReportStart> for ReportStart {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        let name = xml.open_any().await?;
        let mut children = vec![];
        loop {
            match xml.open_any().await {
                Ok(child_name) => {
                    let text = xml.tag_string().await?;
                    let names = read_names(xml).await?;
                    xml.close().await?;
                    let text = text.trim();
                    children.push(ReportChild {
                        name: child_name,
                        text: (!text.is_empty()).then(|| text.to_string()),
                        names,
                    });
                }
                Err(ParsingError::Recoverable) => break,
                Err(e) => return Err(e),
            }
        }
        xml.close().await?;
        Ok(ReportStart { name, children })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::reader::NsReader;

    async fn reader(src: &str) -> Reader<&[u8]> {
        Reader::new(NsReader::from_reader(src.as_bytes()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn propfind_propname() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<rando/>
<garbage><old/></garbage>
<D:propfind xmlns:D="DAV:">
    <D:propname/>
</D:propfind>
"#;

        let mut rdr = reader(src).await;
        let got = rdr.find::<PropFind>().await.unwrap();
        assert_eq!(got, PropFind::PropName);
    }

    #[tokio::test]
    async fn propfind_prop_names() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:" xmlns:A="http://example.org/ns">
    <D:prop>
        <D:displayname/>
        <D:getcontentlength/>
        <D:resourcetype/>
        <A:color/>
    </D:prop>
</D:propfind>
"#;

        let mut rdr = reader(src).await;
        let got = rdr.find::<PropFind>().await.unwrap();
        assert_eq!(
            got,
            PropFind::Prop(vec![
                QName::dav("displayname"),
                QName::dav("getcontentlength"),
                QName::dav("resourcetype"),
                QName::new("http://example.org/ns", "color"),
            ])
        );
    }

    #[tokio::test]
    async fn propfind_allprop_with_include() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:">
    <D:allprop/>
    <D:include>
        <D:supported-report-set/>
    </D:include>
</D:propfind>
"#;

        let mut rdr = reader(src).await;
        let got = rdr.find::<PropFind>().await.unwrap();
        assert_eq!(
            got,
            PropFind::AllProp(Some(vec![QName::dav("supported-report-set")]))
        );
    }

    #[tokio::test]
    async fn propertyupdate_preserves_document_order() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propertyupdate xmlns:D="DAV:" xmlns:Z="http://ns.example.com/z/">
    <D:set>
        <D:prop><Z:authors>Jim</Z:authors></D:prop>
    </D:set>
    <D:remove>
        <D:prop><Z:copyright-owner/></D:prop>
    </D:remove>
    <D:set>
        <D:prop><D:displayname>Web folder</D:displayname></D:prop>
    </D:set>
</D:propertyupdate>
"#;

        let registry = PropertyRegistry::default();
        let mut rdr = reader(src).await;
        let got = PropertyUpdate::find_with(&mut rdr, &registry).await.unwrap();
        assert_eq!(
            got.0,
            vec![
                PropertyUpdateItem::Set(
                    QName::new("http://ns.example.com/z/", "authors"),
                    Value::Text("Jim".into())
                ),
                PropertyUpdateItem::Remove(QName::new(
                    "http://ns.example.com/z/",
                    "copyright-owner"
                )),
                PropertyUpdateItem::Set(
                    QName::dav("displayname"),
                    Value::Text("Web folder".into())
                ),
            ]
        );
    }

    #[tokio::test]
    async fn propertyupdate_parses_structured_values() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propertyupdate xmlns:D="DAV:">
    <D:set>
        <D:prop>
            <D:resourcetype><D:collection/></D:resourcetype>
        </D:prop>
    </D:set>
</D:propertyupdate>
"#;

        let registry = PropertyRegistry::default();
        let mut rdr = reader(src).await;
        let got = PropertyUpdate::find_with(&mut rdr, &registry).await.unwrap();
        assert_eq!(
            got.0,
            vec![PropertyUpdateItem::Set(
                QName::dav("resourcetype"),
                Value::QNames(vec![QName::dav("collection")])
            )]
        );
    }

    #[tokio::test]
    async fn mkcol_extracts_set_properties() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:mkcol xmlns:D="DAV:" xmlns:E="http://example.com/ns/">
    <D:set>
        <D:prop>
            <D:resourcetype>
                <D:collection/>
                <E:special-resource/>
            </D:resourcetype>
            <D:displayname>Special Resource</D:displayname>
        </D:prop>
    </D:set>
</D:mkcol>
"#;

        let registry = PropertyRegistry::default();
        let mut rdr = reader(src).await;
        let got = Mkcol::find_with(&mut rdr, &registry).await.unwrap();
        assert_eq!(
            got.props,
            vec![
                (
                    QName::dav("resourcetype"),
                    Value::QNames(vec![
                        QName::dav("collection"),
                        QName::new("http://example.com/ns/", "special-resource"),
                    ])
                ),
                (
                    QName::dav("displayname"),
                    Value::Text("Special Resource".into())
                ),
            ]
        );
    }

    #[tokio::test]
    async fn report_captures_root_and_children() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<C:calendar-multiget xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
    <D:prop>
        <D:getetag/>
        <C:calendar-data/>
    </D:prop>
    <D:href>/alice/calendar/event.ics</D:href>
</C:calendar-multiget>
"#;

        let mut rdr = reader(src).await;
        let got = rdr.find::<ReportStart>().await.unwrap();
        assert_eq!(
            got.name,
            QName::new("urn:ietf:params:xml:ns:caldav", "calendar-multiget")
        );
        assert_eq!(got.children.len(), 2);
        assert_eq!(got.children[0].name, QName::dav("prop"));
        assert_eq!(
            got.children[0].names,
            vec![
                QName::dav("getetag"),
                QName::new("urn:ietf:params:xml:ns:caldav", "calendar-data"),
            ]
        );
        assert_eq!(got.children[1].name, QName::dav("href"));
        assert_eq!(
            got.children[1].text.as_deref(),
            Some("/alice/calendar/event.ics")
        );
    }
}

use quick_xml::events::{BytesText, Event};
use quick_xml::Error as QError;

use super::name::QName;
use super::types::*;
use super::xml::{IWrite, QWrite, Writer};

impl QWrite for Href {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("href");
        let end = start.to_end();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        xml.q
            .write_event_async(Event::Text(BytesText::new(&self.0)))
            .await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}

/// One property element inside `<d:prop>`: empty when the value is absent
/// (404 buckets, propname answers), expanded otherwise.
async fn write_prop(
    xml: &mut Writer<impl IWrite>,
    name: &QName,
    value: Option<&Value>,
) -> Result<(), QError> {
    let start = xml.create_qname_element(name);
    match value {
        None | Some(Value::Empty) => xml.q.write_event_async(Event::Empty(start)).await,
        Some(Value::Text(txt)) => {
            let end = start.to_end();
            xml.q.write_event_async(Event::Start(start.clone())).await?;
            xml.q
                .write_event_async(Event::Text(BytesText::new(txt)))
                .await?;
            xml.q.write_event_async(Event::End(end)).await
        }
        Some(Value::Int(n)) => {
            let end = start.to_end();
            xml.q.write_event_async(Event::Start(start.clone())).await?;
            xml.q
                .write_event_async(Event::Text(BytesText::new(&n.to_string())))
                .await?;
            xml.q.write_event_async(Event::End(end)).await
        }
        Some(Value::Date(date)) => {
            let end = start.to_end();
            xml.q.write_event_async(Event::Start(start.clone())).await?;
            xml.q
                .write_event_async(Event::Text(BytesText::new(&format_http_date(date))))
                .await?;
            xml.q.write_event_async(Event::End(end)).await
        }
        Some(Value::Href(href)) => {
            let end = start.to_end();
            xml.q.write_event_async(Event::Start(start.clone())).await?;
            href.qwrite(xml).await?;
            xml.q.write_event_async(Event::End(end)).await
        }
        Some(Value::QNames(names)) => {
            let end = start.to_end();
            xml.q.write_event_async(Event::Start(start.clone())).await?;
            for child in names {
                let child_el = xml.create_qname_element(child);
                xml.q.write_event_async(Event::Empty(child_el)).await?;
            }
            xml.q.write_event_async(Event::End(end)).await
        }
    }
}

impl QWrite for PropEntry {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("response");
        let end = start.to_end();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        self.href.qwrite(xml).await?;
        for (status, props) in self.by_status.iter().filter(|(_, p)| !p.is_empty()) {
            let propstat = xml.create_dav_element("propstat");
            let propstat_end = propstat.to_end();
            xml.q
                .write_event_async(Event::Start(propstat.clone()))
                .await?;

            let prop = xml.create_dav_element("prop");
            let prop_end = prop.to_end();
            xml.q.write_event_async(Event::Start(prop.clone())).await?;
            for (name, value) in props {
                write_prop(xml, name, value.as_ref()).await?;
            }
            xml.q.write_event_async(Event::End(prop_end)).await?;

            let status_el = xml.create_dav_element("status");
            let status_end = status_el.to_end();
            xml.q
                .write_event_async(Event::Start(status_el.clone()))
                .await?;
            xml.q
                .write_event_async(Event::Text(BytesText::new(&status_line(*status))))
                .await?;
            xml.q.write_event_async(Event::End(status_end)).await?;

            xml.q.write_event_async(Event::End(propstat_end)).await?;
        }
        xml.q.write_event_async(Event::End(end)).await
    }
}

impl QWrite for Multistatus {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("multistatus");
        let end = start.to_end();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        for response in &self.responses {
            response.qwrite(xml).await?;
        }
        xml.q.write_event_async(Event::End(end)).await
    }
}

impl QWrite for ErrorBody {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("error");
        let end = start.to_end();

        xml.q.write_event_async(Event::Start(start.clone())).await?;

        if let Some(condition) = &self.condition {
            let el = xml.create_qname_element(condition);
            xml.q.write_event_async(Event::Empty(el)).await?;
        }

        for (tag, text) in [
            ("exception", self.kind.as_str()),
            ("message", self.message.as_str()),
            ("davit-version", self.version.as_str()),
        ] {
            let el = xml.create_vendor_element(tag);
            let el_end = el.to_end();
            xml.q.write_event_async(Event::Start(el.clone())).await?;
            xml.q
                .write_event_async(Event::Text(BytesText::new(text)))
                .await?;
            xml.q.write_event_async(Event::End(el_end)).await?;
        }

        xml.q.write_event_async(Event::End(end)).await
    }
}

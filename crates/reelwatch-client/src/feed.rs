use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use reelwatch_core::AppError;
use reelwatch_core::config::FeedSettings;
use reelwatch_core::models::CandidateItem;
use reelwatch_core::traits::FeedSource;
use reqwest::Client;
use url::Url;

use crate::http::{build_client, ensure_success, send_error};

/// Newznab-style RSS feed of an indexer category.
///
/// The API token travels in the query string, so the full URL is never logged.
#[derive(Clone)]
pub struct NewznabFeedSource {
    client: Client,
    url: Url,
    timeout_secs: u64,
}

impl NewznabFeedSource {
    pub fn new(settings: &FeedSettings, api_key: &str) -> Result<Self, AppError> {
        let mut url = Url::parse(&settings.url)
            .map_err(|e| AppError::ConfigError(format!("Invalid feed.url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("id", &settings.category.to_string())
            .append_pair("dl", "1")
            .append_pair("num", &settings.limit.to_string())
            .append_pair("api_token", api_key);

        let timeout = Duration::from_secs(settings.timeout_secs);
        Ok(Self {
            client: build_client(timeout)?,
            url,
            timeout_secs: settings.timeout_secs,
        })
    }

    /// Host part of the feed URL, safe to log.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("<unknown>")
    }
}

impl FeedSource for NewznabFeedSource {
    async fn fetch(&self) -> Result<Vec<CandidateItem>, AppError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| send_error(e.without_url(), self.timeout_secs))?;
        let response = ensure_success(response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read feed body: {e}")))?;

        let items = parse_feed(&body)?;
        tracing::debug!(host = self.host(), bytes = body.len(), items = items.len(), "Parsed feed");
        Ok(items)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Guid,
    Link,
}

#[derive(Default)]
struct ItemBuilder {
    title: String,
    guid: String,
    link: String,
    imdb_id: Option<String>,
}

impl ItemBuilder {
    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Title => &mut self.title,
            Field::Guid => &mut self.guid,
            Field::Link => &mut self.link,
        }
    }

    fn finish(self) -> Option<CandidateItem> {
        let guid = normalize_guid(&self.guid)?;
        let mut item = CandidateItem::new(guid, self.title.trim());
        let link = self.link.trim();
        if !link.is_empty() {
            item = item.with_link(link);
        }
        if let Some(imdb_id) = self.imdb_id {
            item = item.with_imdb_id(imdb_id);
        }
        Some(item)
    }
}

/// Parse an RSS document into candidate items, in document order.
///
/// Items without a GUID are dropped. A newznab `<error>` document is turned
/// into an error: credential codes (100-199) become HTTP 401, everything else
/// a parse error.
pub fn parse_feed(xml: &str) -> Result<Vec<CandidateItem>, AppError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<ItemBuilder> = None;
    let mut field: Option<Field> = None;
    let mut skipped = 0usize;

    loop {
        let event = reader.read_event().map_err(|e| {
            AppError::FeedParseError(format!(
                "invalid XML at byte {}: {e}",
                reader.buffer_position()
            ))
        })?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"item" => current = Some(ItemBuilder::default()),
                b"title" if current.is_some() => field = Some(Field::Title),
                b"guid" if current.is_some() => field = Some(Field::Guid),
                b"link" if current.is_some() => field = Some(Field::Link),
                b"attr" => read_attr(&e, current.as_mut())?,
                b"error" => return Err(indexer_error(&e)?),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"attr" => read_attr(&e, current.as_mut())?,
                b"error" => return Err(indexer_error(&e)?),
                _ => {}
            },
            Event::Text(t) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    let text = t
                        .unescape()
                        .map_err(|e| AppError::FeedParseError(e.to_string()))?;
                    item.field_mut(f).push_str(&text);
                }
            }
            Event::CData(c) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    item.field_mut(f).push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"item" => {
                    field = None;
                    if let Some(builder) = current.take() {
                        match builder.finish() {
                            Some(item) => items.push(item),
                            None => skipped += 1,
                        }
                    }
                }
                b"title" | b"guid" | b"link" => field = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if skipped > 0 {
        tracing::debug!(skipped, "Feed items without a GUID were skipped");
    }
    Ok(items)
}

/// `<newznab:attr name="imdb" value="1234567"/>`, under any namespace prefix.
fn read_attr(e: &BytesStart<'_>, item: Option<&mut ItemBuilder>) -> Result<(), AppError> {
    let Some(item) = item else {
        return Ok(());
    };
    let name = attribute(e, b"name")?;
    if name.as_deref() == Some("imdb")
        && let Some(value) = attribute(e, b"value")?.filter(|v| !v.trim().is_empty())
    {
        item.imdb_id = Some(value.trim().to_string());
    }
    Ok(())
}

fn indexer_error(e: &BytesStart<'_>) -> Result<AppError, AppError> {
    let code = attribute(e, b"code")?.unwrap_or_default();
    let description = attribute(e, b"description")?.unwrap_or_default();
    let message = format!("indexer error {code}: {description}");
    Ok(match code.parse::<u16>() {
        Ok(100..=199) => AppError::http(401, message),
        _ => AppError::FeedParseError(message),
    })
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, AppError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| AppError::FeedParseError(err.to_string()))?;
        if attr.key.local_name().as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|err| AppError::FeedParseError(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// A GUID that is a URL is reduced to its last path segment.
pub fn normalize_guid(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let segment = raw.trim_end_matches('/').rsplit('/').next().unwrap_or(raw);
    let segment = segment.trim();
    (!segment.is_empty()).then(|| segment.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom" xmlns:nntmux="https://nzbfinder.ws/rsshelp/">
  <channel>
    <title>NZBFinder</title>
    <link>https://nzbfinder.ws</link>
    <item>
      <title>Movie.A.2025.1080p.WEBRip-Provider</title>
      <guid isPermaLink="true">https://nzbfinder.ws/details/abc123</guid>
      <link>https://nzbfinder.ws/getnzb/abc123.nzb</link>
      <nntmux:attr name="category" value="2040"/>
      <nntmux:attr name="imdb" value="1234567"/>
    </item>
    <item>
      <title><![CDATA[Movie.B & Co.2025.720p.HDTV-Provider]]></title>
      <guid>def456</guid>
    </item>
    <item>
      <title>No Guid Here</title>
    </item>
    <item>
      <title>Tom &amp; Jerry.2024.1080p.BluRay-Provider</title>
      <guid>https://nzbfinder.ws/details/ghi789/</guid>
      <newznab:attr xmlns:newznab="http://www.newznab.com/DTD/2010/feeds/attributes/" name="imdb" value="tt0111161"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_items_in_order() {
        let items = parse_feed(FEED).unwrap();
        let guids: Vec<_> = items.iter().map(|i| i.guid.as_str()).collect();
        assert_eq!(guids, vec!["abc123", "def456", "ghi789"]);
    }

    #[test]
    fn extracts_imdb_attribute_and_link() {
        let items = parse_feed(FEED).unwrap();
        assert_eq!(items[0].title, "Movie.A.2025.1080p.WEBRip-Provider");
        assert_eq!(items[0].imdb_id.as_deref(), Some("1234567"));
        assert_eq!(
            items[0].link.as_deref(),
            Some("https://nzbfinder.ws/getnzb/abc123.nzb")
        );
        assert_eq!(items[0].external_id().unwrap(), "tt1234567");
        assert_eq!(items[2].external_id().unwrap(), "tt0111161");
    }

    #[test]
    fn decodes_cdata_and_entities() {
        let items = parse_feed(FEED).unwrap();
        assert_eq!(items[1].title, "Movie.B & Co.2025.720p.HDTV-Provider");
        assert_eq!(items[1].imdb_id, None);
        assert_eq!(items[2].title, "Tom & Jerry.2024.1080p.BluRay-Provider");
    }

    #[test]
    fn channel_link_is_not_an_item_field() {
        let items = parse_feed(FEED).unwrap();
        assert_eq!(items[1].link, None);
    }

    #[test]
    fn empty_channel_yields_no_items() {
        let items = parse_feed("<rss><channel><title>x</title></channel></rss>").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = parse_feed("<rss><channel><item><title>x</item></channel></rss>").unwrap_err();
        assert!(matches!(err, AppError::FeedParseError(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn credential_error_document_is_permanent() {
        let err = parse_feed(r#"<?xml version="1.0"?><error code="100" description="Incorrect user credentials"/>"#)
            .unwrap_err();
        assert!(matches!(err, AppError::HttpError { status_code: 401, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn guid_normalization() {
        assert_eq!(normalize_guid("https://x/details/abc").as_deref(), Some("abc"));
        assert_eq!(normalize_guid("https://x/details/abc/").as_deref(), Some("abc"));
        assert_eq!(normalize_guid(" plain-id ").as_deref(), Some("plain-id"));
        assert_eq!(normalize_guid(""), None);
        assert_eq!(normalize_guid("   "), None);
    }

    #[test]
    fn url_carries_category_limit_and_token() {
        let source = NewznabFeedSource::new(&FeedSettings::default(), "secret").unwrap();
        let pairs: Vec<(String, String)> = source
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("id".into(), "2040".into())));
        assert!(pairs.contains(&("num".into(), "50".into())));
        assert!(pairs.contains(&("api_token".into(), "secret".into())));
        assert_eq!(source.host(), "nzbfinder.ws");
    }
}

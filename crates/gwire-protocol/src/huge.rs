//! The composite extension run carried by queries and query-hit results.
//!
//! An extension run is a sequence of tokens separated by 0x1C and ended by
//! a zero byte or the end of the area. Each token is one of:
//!
//! - a GGEP block, recognized by its 0xC3 magic and self-delimiting;
//! - a URN (`urn:sha1:...`, `urn:bitprint:...`);
//! - a bare URN request tag (`urn:sha1:` for one kind, `urn:` for any)
//!   asking for URNs in hits;
//! - an XML metadata snippet starting with `<?xml`;
//! - anything else, kept as an opaque string.
//!
//! Parsing is best effort and never fails: a malformed token is logged and
//! skipped, and everything readable around it is kept. Multiple GGEP blocks
//! in one run merge into a single view, later blocks winning on key
//! collisions.

use tracing::debug;

use gwire_core::constants::{EXTENSION_SEPARATOR, GGEP_MAGIC};

use crate::ggep::GgepBlock;
use crate::urn::{Urn, UrnType};

/// The parsed-out contents of one extension run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HugeExtension {
    ggep: GgepBlock,
    urns: Vec<Urn>,
    urn_types: Vec<UrnType>,
    rich_query: Option<String>,
    misc: Vec<String>,
}

impl HugeExtension {
    /// Parses an extension area. `buf` should span from the start of the
    /// run to wherever the caller's enclosing format ends it; a zero byte
    /// inside `buf` also ends the run.
    pub fn parse(buf: &[u8]) -> HugeExtension {
        let mut ext = HugeExtension::default();
        let mut pos = 0;

        while pos < buf.len() {
            if buf[pos] == 0 {
                break;
            }
            if buf[pos] == EXTENSION_SEPARATOR {
                pos += 1;
                continue;
            }
            if buf[pos] == GGEP_MAGIC {
                match GgepBlock::parse(buf, pos) {
                    Ok((block, end)) => {
                        ext.ggep.merge(block);
                        pos = end;
                    }
                    Err(err) => {
                        debug!(%err, "skipping malformed extension block");
                        pos = skip_to_separator(buf, pos);
                    }
                }
                continue;
            }

            let end = token_end(buf, pos);
            ext.classify(&buf[pos..end]);
            pos = end;
        }

        ext
    }

    fn classify(&mut self, token: &[u8]) {
        let Ok(text) = std::str::from_utf8(token) else {
            debug!(len = token.len(), "skipping non-utf8 extension token");
            return;
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        // Slicing the str itself could land inside a multi-byte character.
        let urn_prefixed = trimmed
            .as_bytes()
            .get(..4)
            .map_or(false, |p| p.eq_ignore_ascii_case(b"urn:"));
        if urn_prefixed {
            if let Ok(urn) = trimmed.parse::<Urn>() {
                self.urns.push(urn);
            } else if let Some(tag) = UrnType::from_prefix(trimmed) {
                self.urn_types.push(tag);
            } else {
                debug!(token = trimmed, "skipping unrecognized urn token");
            }
        } else if trimmed.starts_with("<?xml") && self.rich_query.is_none() {
            self.rich_query = Some(trimmed.to_owned());
        } else {
            self.misc.push(trimmed.to_owned());
        }
    }

    /// The merged view of every GGEP block in the run.
    pub fn ggep(&self) -> &GgepBlock {
        &self.ggep
    }

    /// The URNs found in the run, in order of appearance.
    pub fn urns(&self) -> &[Urn] {
        &self.urns
    }

    /// Bare tags requesting URNs of some or every kind in replies.
    pub fn urn_types(&self) -> &[UrnType] {
        &self.urn_types
    }

    /// The first XML metadata token, if any.
    pub fn rich_query(&self) -> Option<&str> {
        self.rich_query.as_deref()
    }

    /// Tokens that fit no other category.
    pub fn misc(&self) -> &[String] {
        &self.misc
    }

    /// True when the run produced nothing at all.
    pub fn is_empty(&self) -> bool {
        self.ggep.is_empty()
            && self.urns.is_empty()
            && self.urn_types.is_empty()
            && self.rich_query.is_none()
            && self.misc.is_empty()
    }
}

/// End of the token starting at `pos`: the next separator, zero byte, or
/// end of the buffer.
fn token_end(buf: &[u8], pos: usize) -> usize {
    buf[pos..]
        .iter()
        .position(|&b| b == EXTENSION_SEPARATOR || b == 0)
        .map_or(buf.len(), |i| pos + i)
}

/// After a token that could not be parsed, resume at the next separator.
fn skip_to_separator(buf: &[u8], pos: usize) -> usize {
    buf[pos..]
        .iter()
        .position(|&b| b == EXTENSION_SEPARATOR)
        .map_or(buf.len(), |i| pos + i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ggep::keys;
    use crate::urn::UrnKind;

    const SHA1: &str = "urn:sha1:PLSTHIPQGSSZTS5FJUPAKUZWUGYQYPFB";

    #[test]
    fn empty_run() {
        assert!(HugeExtension::parse(&[]).is_empty());
        assert!(HugeExtension::parse(&[EXTENSION_SEPARATOR]).is_empty());
    }

    #[test]
    fn classifies_mixed_tokens() {
        let run = format!("{SHA1}\u{1c}urn:sha1:\u{1c}<?xml version=\"1.0\"?><audios/>\u{1c}plain");
        let ext = HugeExtension::parse(run.as_bytes());
        assert_eq!(ext.urns().len(), 1);
        assert_eq!(ext.urns()[0].to_string(), SHA1);
        assert_eq!(ext.urn_types(), &[UrnType::Kind(UrnKind::Sha1)]);
        assert!(ext.rich_query().unwrap().starts_with("<?xml"));
        assert_eq!(ext.misc(), &["plain".to_owned()]);
    }

    #[test]
    fn bare_urn_tag_requests_any_kind() {
        let run = format!("urn:\u{1c}{SHA1}");
        let ext = HugeExtension::parse(run.as_bytes());
        assert_eq!(ext.urn_types(), &[UrnType::Any]);
        assert_eq!(ext.urns().len(), 1);
    }

    #[test]
    fn multibyte_token_is_classified_not_sliced() {
        // Byte 4 of the token falls inside a two-byte character.
        let ext = HugeExtension::parse("abcж".as_bytes());
        assert_eq!(ext.misc(), &["abcж".to_owned()]);

        let ext = HugeExtension::parse("urnж\u{1c}ok".as_bytes());
        assert_eq!(ext.misc(), &["urnж".to_owned(), "ok".to_owned()]);
    }

    #[test]
    fn merges_ggep_blocks() {
        let mut a = GgepBlock::new();
        a.put_str(keys::VENDOR_INFO, "LIME");
        let mut b = GgepBlock::new();
        b.put_flag(keys::NO_PROXY);
        let mut run = a.to_bytes();
        run.push(EXTENSION_SEPARATOR);
        run.extend_from_slice(&b.to_bytes());

        let ext = HugeExtension::parse(&run);
        assert_eq!(ext.ggep().string(keys::VENDOR_INFO).unwrap(), "LIME");
        assert!(ext.ggep().contains(keys::NO_PROXY));
    }

    #[test]
    fn malformed_ggep_is_skipped_not_fatal() {
        // A lone magic byte, then a separator and a good URN.
        let mut run = vec![GGEP_MAGIC];
        run.push(EXTENSION_SEPARATOR);
        run.extend_from_slice(SHA1.as_bytes());

        let ext = HugeExtension::parse(&run);
        assert!(ext.ggep().is_empty());
        assert_eq!(ext.urns().len(), 1);
    }

    #[test]
    fn stops_at_zero_byte() {
        let mut run = SHA1.as_bytes().to_vec();
        run.push(0);
        run.extend_from_slice(b"after the terminator");
        let ext = HugeExtension::parse(&run);
        assert_eq!(ext.urns().len(), 1);
        assert!(ext.misc().is_empty());
    }

    #[test]
    fn second_xml_token_is_misc() {
        let run = "<?xml a?>\u{1c}<?xml b?>";
        let ext = HugeExtension::parse(run.as_bytes());
        assert_eq!(ext.rich_query(), Some("<?xml a?>"));
        assert_eq!(ext.misc(), &["<?xml b?>".to_owned()]);
    }

    #[test]
    fn non_utf8_token_is_dropped() {
        let run = [0xFF, 0xFE, EXTENSION_SEPARATOR, b'o', b'k'];
        let ext = HugeExtension::parse(&run);
        assert_eq!(ext.misc(), &["ok".to_owned()]);
    }
}

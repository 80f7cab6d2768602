//! Per-format datagram catalogs

use crate::format::FormatId;
use crate::frame::FrameLayout;
use crate::schema::Descriptor;
use crate::tag::TypeTag;

/// One top-level datagram type
#[derive(Debug)]
pub struct CatalogEntry {
    pub tag: TypeTag,
    pub name: &'static str,
    pub description: &'static str,
    pub descriptor: &'static Descriptor,
    /// Smallest frame that can hold this datagram's fixed head
    pub min_header_len: usize,
}

/// Ping datagram type whose pings may be split over several datagrams
#[derive(Debug)]
pub struct PingLayout {
    pub tag: TypeTag,
    /// Decoded from the start of each ping datagram; must be
    /// `SizeRule::Open` so the rest of the frame is left alone
    pub head: &'static Descriptor,
    /// Number of datagrams making up the ping
    pub partition_count: &'static str,
    /// 1-based position of a datagram within its ping
    pub partition_number: &'static str,
    pub beams: &'static str,
    pub tx_sectors: &'static str,
}

/// Static catalog for one format: frame layout plus datagram table
#[derive(Debug)]
pub struct Catalog {
    pub format: FormatId,
    pub name: &'static str,
    pub layout: FrameLayout,
    pub entries: &'static [CatalogEntry],
    pub pings: &'static [PingLayout],
}

impl Catalog {
    /// Linear lookup; the registry keeps a hashed index for hot paths
    pub fn entry(&self, tag: TypeTag) -> Option<&'static CatalogEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    /// Does `data` start with a plausible frame header of this format?
    pub fn sniff(&self, data: &[u8]) -> bool {
        self.layout.probe(data).is_ok()
    }

    pub fn ping_layout(&self, tag: TypeTag) -> Option<&'static PingLayout> {
        self.pings.iter().find(|p| p.tag == tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.entries.iter().map(|e| e.tag)
    }
}

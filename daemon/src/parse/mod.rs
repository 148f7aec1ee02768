//! Wire-format readers: gzip envelopes and the two replication XML
//! document kinds.

mod changeset;
mod gz;
mod osmchange;

pub use changeset::read_changeset_xml;
pub use gz::decompress;
pub use osmchange::read_osmchange_xml;

pub mod cache;
pub mod lookup;
pub mod membership;

pub use cache::FilterCache;
pub use lookup::{LookupTarget, NamedFilter, TermsLookup, TermsLookupRequest};
pub use membership::{MembershipFilter, MembershipFilterBuilder};

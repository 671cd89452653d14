//! Field encryption policy: which fields are PHI, how their values are
//! coerced to text, and record-level encrypt/decrypt/validate.

mod field_policy;
mod record;

pub use field_policy::FieldPolicy;
pub use record::RecordCipher;

/// The signed subset of a narinfo.
///
/// `references` holds full store paths in the order they were received;
/// the order is part of the fingerprint and is never normalised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NarInfoRecord {
    pub store_path: String,
    pub nar_hash: String,
    pub nar_size: u64,
    pub references: Vec<String>,
    pub signature: Option<String>,
}

impl NarInfoRecord {
    pub fn new(
        store_path: impl Into<String>,
        nar_hash: impl Into<String>,
        nar_size: u64,
        references: Vec<String>,
    ) -> Self {
        Self {
            store_path: store_path.into(),
            nar_hash: nar_hash.into(),
            nar_size,
            references,
            signature: None,
        }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self)
    }
}

/// Generate the fingerprint that gets signed for a narinfo record
///
/// The fingerprint format is:
/// `1;<store-path>;<nar-hash>;<nar-size>;<comma-separated-references>`
///
/// An empty reference list leaves a trailing empty field, so the result
/// ends in `;`.
pub fn fingerprint(record: &NarInfoRecord) -> String {
    let nar_size_str = record.nar_size.to_string();

    // Calculate capacity
    let fixed_len = 2 + // "1;"
        record.store_path.len() + 1 + // store path + ";"
        record.nar_hash.len() + 1 + // nar hash + ";"
        nar_size_str.len() + 1; // nar size + ";"

    let refs_len = record.references.iter().map(|r| r.len()).sum::<usize>()
        + record.references.len().saturating_sub(1); // commas between refs

    let mut result = String::with_capacity(fixed_len + refs_len);

    result.push_str("1;");
    result.push_str(&record.store_path);
    result.push(';');
    result.push_str(&record.nar_hash);
    result.push(';');
    result.push_str(&nar_size_str);
    result.push(';');

    for (i, reference) in record.references.iter().enumerate() {
        if i > 0 {
            result.push(',');
        }
        result.push_str(reference);
    }

    result
}

//! `dpkg -l` inventory parsing.

/// One installed package row from the inventory. The version stays raw
/// here; parsing happens during matching so a bad version fails only its
/// own package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub raw_version: String,
}

/// Extract installed (`ii`) rows from raw `dpkg -l` output. Header rows and
/// packages in other states are skipped. Architecture qualifiers
/// (`libssl3:amd64`) are stripped from the name.
pub fn parse_inventory(raw: &str) -> Vec<InstalledPackage> {
    raw.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            if fields.next() != Some("ii") {
                return None;
            }
            let name = fields.next()?;
            let version = fields.next()?;
            let name = name.split(':').next().unwrap_or(name);
            Some(InstalledPackage {
                name: name.to_string(),
                raw_version: version.to_string(),
            })
        })
        .collect()
}

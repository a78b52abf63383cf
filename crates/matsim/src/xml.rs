//! Small helpers shared by the descriptor parsers and the event reader.

use std::collections::HashMap;
use std::path::Path;

use quick_xml::events::BytesStart;

use crate::MatsimError;

/// Collects the attributes of an element into an owned map.
///
/// MATSim files are attribute-heavy and every handler looks attributes up
/// by name, so one allocation per element keeps the call sites simple.
pub fn attributes(
    element: &BytesStart<'_>,
    path: &Path,
) -> Result<HashMap<String, String>, MatsimError> {
    let mut map = HashMap::new();
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|source| MatsimError::XmlAttribute {
            path: path.to_path_buf(),
            source,
        })?;
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|source| MatsimError::Xml {
                path: path.to_path_buf(),
                source,
            })?
            .into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

/// Pulls a required attribute out of a parsed attribute map.
pub fn require<'a>(
    attributes: &'a HashMap<String, String>,
    element: &str,
    name: &str,
    path: &Path,
) -> Result<&'a str, MatsimError> {
    attributes
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| MatsimError::MissingElementAttribute {
            path: path.to_path_buf(),
            element: element.to_owned(),
            attribute: name.to_owned(),
        })
}

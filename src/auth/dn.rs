use thiserror::Error;
use tracing::debug;
use x509_parser::der_parser::asn1_rs::Tag;
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};
use x509_parser::x509::AttributeTypeAndValue;

const SEPARATOR: &str = "/";

/// Short names written for each subject attribute
const OID_NAMES: &[(&str, &str)] = &[
    ("2.5.4.3", "CN"),
    ("2.5.4.4", "SN"),
    ("2.5.4.5", "serialNumber"),
    ("2.5.4.6", "C"),
    ("2.5.4.7", "L"),
    ("2.5.4.8", "ST"),
    ("2.5.4.9", "STREET"),
    ("2.5.4.10", "O"),
    ("2.5.4.11", "OU"),
    ("2.5.4.12", "title"),
    ("2.5.4.17", "postalCode"),
    ("2.5.4.42", "GN"),
    ("2.5.4.43", "initials"),
    ("2.5.4.44", "generationQualifier"),
    ("2.5.4.46", "dnQualifier"),
    ("2.5.4.65", "pseudonym"),
    ("0.9.2342.19200300.100.1.25", "DC"),
    ("1.2.840.113549.1.9.1", "emailAddress"),
    ("0.9.2342.19200300.100.1.1", "UID"),
];

#[derive(Debug, Error)]
#[error("unable to parse certificate: {0}")]
pub struct DnError(String);

fn short_name(oid: &str) -> &'static str {
    OID_NAMES
        .iter()
        .find(|(id, _)| *id == oid)
        .map(|(_, name)| *name)
        .unwrap_or("")
}

/// Slash-separated DN in certificate encoding order, e.g. `/DC=org/DC=example/O=Lab/CN=Jane Doe`.
///
/// This is the reverse of the RFC 4514 string form and is the format grid tooling
/// stores, so it must not change. Attributes missing from the table are written with
/// an empty name.
pub fn format_dn(name: &X509Name<'_>) -> String {
    let mut out = String::new();
    for rdn in name.iter_rdn() {
        for attr in rdn.iter() {
            let oid = attr.attr_type().to_id_string();
            out.push_str(SEPARATOR);
            out.push_str(short_name(&oid));
            out.push('=');
            out.push_str(&attribute_value(attr));
        }
    }
    out
}

fn attribute_value(attr: &AttributeTypeAndValue<'_>) -> String {
    if let Ok(value) = attr.as_str() {
        return value.to_string();
    }
    let any = attr.attr_value();
    debug!("Decoding {:?} DN attribute {}", any.tag(), attr.attr_type().to_id_string());
    decode_string(any.tag(), any.data)
}

/// Text of a string attribute that is not stored as UTF-8 compatible bytes
fn decode_string(tag: Tag, data: &[u8]) -> String {
    match tag {
        Tag::BmpString => {
            let units: Vec<u16> = data
                .chunks(2)
                .map(|c| u16::from_be_bytes([c[0], c.get(1).copied().unwrap_or(0)]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        Tag::UniversalString => data
            .chunks(4)
            .map(|c| {
                let mut word = [0u8; 4];
                word[..c.len()].copy_from_slice(c);
                char::from_u32(u32::from_be_bytes(word)).unwrap_or(char::REPLACEMENT_CHARACTER)
            })
            .collect(),
        _ => String::from_utf8_lossy(data).into_owned(),
    }
}

/// Subject DN of a DER encoded certificate
pub fn certificate_dn(der: &[u8]) -> Result<String, DnError> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| DnError(e.to_string()))?;
    Ok(format_dn(cert.subject()))
}

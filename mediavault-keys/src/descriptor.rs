//! GPAC DRM descriptor rendering
//!
//! MP4Box reads CENC parameters from a `GPACDRM` XML document passed with
//! `-crypt`. One `CrypTrack` entry is emitted per track id; every track shares
//! the asset's key, key id and first IV.

use crate::key_types::DrmMetadata;

/// ClearKey protection system id
pub const CLEARKEY_SYSTEM_ID: &str = "1077efecc0b24d02ace33c1e52e2fb4b";

/// Render the descriptor for the given tracks (`track_ids` of 0 means "all
/// tracks" to MP4Box).
pub fn render_cenc_descriptor(drm: &DrmMetadata, track_ids: &[u32]) -> String {
    let tracks = if track_ids.is_empty() { &[1u32][..] } else { track_ids };

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<GPACDRM type=\"CENC AES-CTR\">\n");
    xml.push_str(&format!(
        "  <DRMInfo type=\"pssh\" version=\"1\">\n    <BS ID128=\"{}\"/>\n    <BS bits=\"32\" value=\"1\"/>\n    <BS ID128=\"0x{}\"/>\n  </DRMInfo>\n",
        CLEARKEY_SYSTEM_ID,
        drm.key_id.to_hex()
    ));

    for track in tracks {
        xml.push_str(&format!(
            "  <CrypTrack trackID=\"{}\" IsEncrypted=\"1\" IV_size=\"16\" first_IV=\"0x{}\" saiSavedBox=\"senc\">\n    <key KID=\"0x{}\" value=\"0x{}\"/>\n  </CrypTrack>\n",
            track,
            drm.first_iv.to_hex(),
            drm.key_id.to_hex(),
            drm.key.to_hex()
        ));
    }

    xml.push_str("</GPACDRM>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_types::{ContentKey, Iv, KeyId};

    fn drm() -> DrmMetadata {
        DrmMetadata {
            first_iv: Iv::from_bytes([0x11; 16]),
            key: ContentKey::from_bytes([0x22; 16]),
            key_id: KeyId::from_bytes([0x33; 16]),
        }
    }

    #[test]
    fn test_descriptor_contains_key_material() {
        let xml = render_cenc_descriptor(&drm(), &[1]);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("first_IV=\"0x11111111111111111111111111111111\""));
        assert!(xml.contains("KID=\"0x33333333333333333333333333333333\""));
        assert!(xml.contains("value=\"0x22222222222222222222222222222222\""));
        assert!(xml.contains(CLEARKEY_SYSTEM_ID));
    }

    #[test]
    fn test_one_entry_per_track() {
        let xml = render_cenc_descriptor(&drm(), &[1, 2]);
        assert_eq!(xml.matches("<CrypTrack").count(), 2);
        assert!(xml.contains("trackID=\"2\""));
    }

    #[test]
    fn test_empty_track_list_defaults_to_first_track() {
        let xml = render_cenc_descriptor(&drm(), &[]);
        assert_eq!(xml.matches("<CrypTrack").count(), 1);
        assert!(xml.contains("trackID=\"1\""));
    }
}

//! side-band demultiplexing.
//!
//! Once the server has switched to `side-band-64k` (or `side-band`), every
//! pkt-line payload in the packfile section is prefixed with a one-byte band
//! number: `1` is pack data, `2` is human-readable progress, `3` is a fatal
//! error message. Band 2 is discarded; band 3 aborts the fetch.

use crate::error::{Error, Result};

pub enum Band {
    Pack,
    Progress,
    Error,
}

impl Band {
    fn from_byte(b: u8) -> Option<Band> {
        match b {
            1 => Some(Band::Pack),
            2 => Some(Band::Progress),
            3 => Some(Band::Error),
            _ => None,
        }
    }
}

/// demultiplex one sideband-framed pkt-line payload.
///
/// `enabled` is false when the server never advertised `side-band[-64k]`; in
/// that case the whole payload is pack data with no band prefix.
pub fn demux(payload: &[u8], enabled: bool) -> Result<(Band, &[u8])> {
    if !enabled {
        return Ok((Band::Pack, payload));
    }
    let (&band_byte, rest) = payload
        .split_first()
        .ok_or_else(|| Error::PackFormat("empty sideband frame".into()))?;
    let band = Band::from_byte(band_byte)
        .ok_or_else(|| Error::PackFormat(format!("unknown sideband {band_byte}")))?;
    Ok((band, rest))
}

/// feed every pkt-line payload from `lines` through [`demux`], concatenating
/// band-1 bytes into the returned packfile byte stream and discarding band-2
/// progress. Band-3 aborts with the server's error text.
pub fn collect_pack_bytes(lines: &[Vec<u8>], enabled: bool) -> Result<Vec<u8>> {
    let mut pack = Vec::new();
    for payload in lines {
        match demux(payload, enabled)? {
            (Band::Pack, data) => pack.extend_from_slice(data),
            (Band::Progress, _) => {}
            (Band::Error, data) => {
                return Err(Error::Transport(String::from_utf8_lossy(data).into_owned()));
            }
        }
    }
    Ok(pack)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_when_disabled() {
        let (band, data) = demux(b"PACK...", false).unwrap();
        assert!(matches!(band, Band::Pack));
        assert_eq!(data, b"PACK...");
    }

    #[test]
    fn splits_band_prefix() {
        let mut frame = vec![1u8];
        frame.extend_from_slice(b"PACKDATA");
        let (band, data) = demux(&frame, true).unwrap();
        assert!(matches!(band, Band::Pack));
        assert_eq!(data, b"PACKDATA");
    }

    #[test]
    fn progress_band_is_discarded_by_collector() {
        let mut progress = vec![2u8];
        progress.extend_from_slice(b"Counting objects: 1\n");
        let mut pack = vec![1u8];
        pack.extend_from_slice(b"PACKBYTES");

        let collected = collect_pack_bytes(&[progress, pack], true).unwrap();
        assert_eq!(collected, b"PACKBYTES");
    }

    #[test]
    fn error_band_aborts() {
        let mut err = vec![3u8];
        err.extend_from_slice(b"upload-pack: not our ref");
        assert!(collect_pack_bytes(&[err], true).is_err());
    }
}

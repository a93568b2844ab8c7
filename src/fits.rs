//! Minimal reader for numeric cards in a FITS primary header.
//!
//! Only what the uvf-to-vis conversion needs: the reference value and pixel
//! of the fourth axis (`CRVAL4`, `CRPIX4`).

use crate::error::HeaderError;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub(crate) const CARD_LEN: usize = 80;
pub(crate) const BLOCK_LEN: usize = 2880;
/// Headers longer than this are treated as corrupt
const MAX_HEADER_BLOCKS: usize = 64;

/// Numeric keyword values from a primary header.
#[derive(Debug, Clone, Default)]
pub struct Header {
    cards: HashMap<String, String>,
}

/// Reference velocity and channel passed to the converter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityReference {
    pub crval4: f64,
    pub crpix4: f64,
}

impl Header {
    pub fn read(path: &Path) -> Result<Self, HeaderError> {
        let io_err = |source| HeaderError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        let mut header = Header::default();
        let mut block = [0u8; BLOCK_LEN];

        for _ in 0..MAX_HEADER_BLOCKS {
            if let Err(e) = file.read_exact(&mut block) {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    return Err(HeaderError::Truncated {
                        path: path.to_path_buf(),
                    });
                }
                return Err(io_err(e));
            }
            for card in block.chunks_exact(CARD_LEN) {
                if header.push_card(card) {
                    return Ok(header);
                }
            }
        }

        Err(HeaderError::Truncated {
            path: path.to_path_buf(),
        })
    }

    /// Parse one card, returning true at `END`
    fn push_card(&mut self, card: &[u8]) -> bool {
        let card = String::from_utf8_lossy(card).into_owned();
        let keyword = card.get(..8).unwrap_or(card.as_str()).trim_end();
        if keyword == "END" {
            return true;
        }
        if card.get(8..10) != Some("= ") {
            return false;
        }
        let value = card
            .get(10..)
            .and_then(|v| v.split('/').next())
            .unwrap_or("")
            .trim();
        self.cards.insert(keyword.to_string(), value.to_string());
        false
    }

    pub fn raw(&self, keyword: &str) -> Option<&str> {
        self.cards.get(keyword).map(String::as_str)
    }

    pub fn float(&self, keyword: &str, path: &Path) -> Result<f64, HeaderError> {
        let raw = self.raw(keyword).ok_or_else(|| HeaderError::MissingKeyword {
            path: path.to_path_buf(),
            keyword: keyword.to_string(),
        })?;
        // Fortran-style exponents are legal in FITS
        raw.replace(['D', 'd'], "E")
            .parse()
            .map_err(|_| HeaderError::InvalidValue {
                keyword: keyword.to_string(),
                value: raw.to_string(),
            })
    }
}

/// Read `CRVAL4` and `CRPIX4` from a UVFITS file.
pub fn read_velocity_reference(path: &Path) -> Result<VelocityReference, HeaderError> {
    let header = Header::read(path)?;
    Ok(VelocityReference {
        crval4: header.float("CRVAL4", path)?,
        crpix4: header.float("CRPIX4", path)?,
    })
}

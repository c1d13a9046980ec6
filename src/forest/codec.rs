//! Binary forest persistence.
//!
//! All fields little-endian. A fixed header carries magic bytes and a
//! format version; the payload lays out node records, parallel scores,
//! packed factor words and per-tree heights exactly as held in memory, so
//! decoding is a straight read with no fixups.

use std::io::{self, Read, Write};

use thiserror::Error;

use super::{Forest, ForestNode};

/// Magic bytes identifying a serialized forest.
pub const MAGIC: &[u8; 4] = b"CNPF";

/// Current format version.
pub const VERSION: u16 = 1;

/// Forest decoding errors.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("not a forest stream: bad magic")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("corrupt stream: {0}")]
    Corrupt(&'static str),
}

impl Forest {
    /// Serializes the forest.
    pub fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let (nodes, scores, node_heights, fac_words, fac_heights, cardinality, pred_info) =
            self.raw_parts();

        out.write_all(MAGIC)?;
        out.write_all(&VERSION.to_le_bytes())?;
        out.write_all(&0u16.to_le_bytes())?;

        write_u32(out, self.n_pred() as u32)?;
        write_u32(out, self.n_pred_num() as u32)?;
        write_u32(out, self.n_tree() as u32)?;
        write_u32(out, 0)?;

        for &card in cardinality {
            write_u32(out, card)?;
        }
        for &height in node_heights {
            write_u64(out, height as u64)?;
        }
        for &height in fac_heights {
            write_u64(out, height as u64)?;
        }
        for node in nodes {
            write_u32(out, node.lh_del)?;
            write_u32(out, node.pred_idx)?;
            write_u64(out, node.split_code)?;
            write_f64(out, node.info)?;
        }
        for &score in scores {
            write_f64(out, score)?;
        }
        for &word in fac_words {
            write_u64(out, word)?;
        }
        for &info in pred_info {
            write_f64(out, info)?;
        }
        Ok(())
    }

    /// Deserializes a forest.
    pub fn decode<R: Read>(input: &mut R) -> Result<Forest, DecodeError> {
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let version = read_u16(input)?;
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let _reserved = read_u16(input)?;

        let n_pred = read_u32(input)? as usize;
        let n_pred_num = read_u32(input)? as usize;
        let n_tree = read_u32(input)? as usize;
        let _reserved = read_u32(input)?;
        if n_pred_num > n_pred {
            return Err(DecodeError::Corrupt("numeric block exceeds predictors"));
        }

        let cardinality: Vec<u32> = (0..n_pred - n_pred_num)
            .map(|_| read_u32(input))
            .collect::<Result<_, _>>()?;
        let node_heights: Vec<usize> = (0..n_tree)
            .map(|_| read_u64(input).map(|h| h as usize))
            .collect::<Result<_, _>>()?;
        let fac_heights: Vec<usize> = (0..n_tree)
            .map(|_| read_u64(input).map(|h| h as usize))
            .collect::<Result<_, _>>()?;
        if node_heights.windows(2).any(|w| w[0] > w[1])
            || fac_heights.windows(2).any(|w| w[0] > w[1])
        {
            return Err(DecodeError::Corrupt("heights not monotone"));
        }

        let n_nodes = node_heights.last().copied().unwrap_or(0);
        let n_words = fac_heights.last().copied().unwrap_or(0);

        let mut nodes = Vec::with_capacity(n_nodes);
        for _ in 0..n_nodes {
            nodes.push(ForestNode {
                lh_del: read_u32(input)?,
                pred_idx: read_u32(input)?,
                split_code: read_u64(input)?,
                info: read_f64(input)?,
            });
        }
        let scores: Vec<f64> = (0..n_nodes)
            .map(|_| read_f64(input))
            .collect::<Result<_, _>>()?;
        let fac_words: Vec<u64> = (0..n_words)
            .map(|_| read_u64(input))
            .collect::<Result<_, _>>()?;
        let pred_info: Vec<f64> = (0..n_pred)
            .map(|_| read_f64(input))
            .collect::<Result<_, _>>()?;

        Ok(Forest::from_raw_parts(
            n_pred,
            n_pred_num,
            cardinality,
            nodes,
            scores,
            node_heights,
            fac_words,
            fac_heights,
            pred_info,
        ))
    }
}

fn write_u32<W: Write>(out: &mut W, value: u32) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

fn write_u64<W: Write>(out: &mut W, value: u64) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

fn write_f64<W: Write>(out: &mut W, value: f64) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

fn read_u16<R: Read>(input: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(input: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(input: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64<R: Read>(input: &mut R) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

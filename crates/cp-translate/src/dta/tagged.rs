//! Tagged `.dta` layout (releases 117, 118, 119).
//!
//! Sections are delimited by ASCII tags (`<header>`, `<map>`, `<data>` …).
//! The `<map>` section holds absolute offsets of every section; we use it to
//! jump over characteristics and reach `<data>` and `<strls>` directly.

use std::collections::HashMap;

use cp_core::Frame;

use super::buffer::{ByteOrder, DtaBuffer, decode_text};
use super::{DtaError, DtaHeader, Result, VarSpec, VarType, build_frame, read_rows};

/// Index of the `<data>` offset in `<map>`.
const MAP_DATA: usize = 9;
/// Index of the `<strls>` offset in `<map>`.
const MAP_STRLS: usize = 10;
const MAP_LEN: usize = 14;

fn type_from_code(code: u16) -> Result<VarType> {
    Ok(match code {
        1..=2045 => VarType::Str(code as usize),
        32768 => VarType::StrL,
        65526 => VarType::Double,
        65527 => VarType::Float,
        65528 => VarType::Long,
        65529 => VarType::Int,
        65530 => VarType::Byte,
        other => return Err(DtaError::Malformed(format!("unknown type code {}", other))),
    })
}

/// Header plus the section offsets from `<map>`.
#[derive(Debug, Clone)]
pub struct TaggedHeader {
    /// Shared header information.
    pub header: DtaHeader,
    /// Section offsets.
    pub map: [u64; MAP_LEN],
}

/// Parse `<header>`, `<map>`, `<variable_types>` and `<varnames>`.
pub fn parse_header(buf: &mut DtaBuffer<'_>) -> Result<TaggedHeader> {
    buf.expect_tag("<stata_dta>")?;
    buf.expect_tag("<header>")?;
    buf.expect_tag("<release>")?;
    let release_txt = decode_text(buf.read_bytes(3)?);
    let release: u16 = release_txt
        .parse()
        .map_err(|_| DtaError::Malformed(format!("release '{}'", release_txt)))?;
    if !(117..=119).contains(&release) {
        return Err(DtaError::UnsupportedRelease(release));
    }
    buf.expect_tag("</release>")?;
    buf.expect_tag("<byteorder>")?;
    let order = match buf.read_bytes(3)? {
        b"MSF" => ByteOrder::Big,
        b"LSF" => ByteOrder::Little,
        other => {
            return Err(DtaError::Malformed(format!(
                "byte order '{}'",
                String::from_utf8_lossy(other)
            )));
        }
    };
    buf.set_order(order);
    buf.expect_tag("</byteorder>")?;

    buf.expect_tag("<K>")?;
    let nvar = if release == 119 { buf.read_u32()? as usize } else { buf.read_u16()? as usize };
    buf.expect_tag("</K>")?;
    buf.expect_tag("<N>")?;
    let nobs = if release == 117 { buf.read_u32()? as usize } else { buf.read_u64()? as usize };
    buf.expect_tag("</N>")?;

    buf.expect_tag("<label>")?;
    let label_len = if release == 117 { buf.read_u8()? as usize } else { buf.read_u16()? as usize };
    buf.skip(label_len)?;
    buf.expect_tag("</label>")?;
    buf.expect_tag("<timestamp>")?;
    let ts_len = buf.read_u8()? as usize;
    buf.skip(ts_len)?;
    buf.expect_tag("</timestamp>")?;
    buf.expect_tag("</header>")?;

    buf.expect_tag("<map>")?;
    let mut map = [0u64; MAP_LEN];
    for slot in map.iter_mut() {
        *slot = buf.read_u64()?;
    }
    buf.expect_tag("</map>")?;

    buf.expect_tag("<variable_types>")?;
    if nvar.saturating_mul(2) > buf.remaining() {
        return Err(DtaError::Truncated { offset: buf.pos(), need: nvar.saturating_mul(2), have: buf.remaining() });
    }
    let mut variables = Vec::with_capacity(nvar);
    for _ in 0..nvar {
        let ty = type_from_code(buf.read_u16()?)?;
        variables.push(VarSpec { name: String::new(), ty });
    }
    buf.expect_tag("</variable_types>")?;

    buf.expect_tag("<varnames>")?;
    let name_width = if release == 117 { 33 } else { 129 };
    for var in variables.iter_mut() {
        var.name = buf.read_fixed_str(name_width)?;
    }
    buf.expect_tag("</varnames>")?;

    Ok(TaggedHeader { header: DtaHeader { release, n_obs: nobs, variables }, map })
}

/// Decode the 8-byte `(v, o)` reference stored in a `strL` data cell.
fn read_strl_ref(buf: &mut DtaBuffer<'_>, release: u16) -> Result<(u64, u64)> {
    if release == 117 {
        let v = buf.read_u32()? as u64;
        let o = buf.read_u32()? as u64;
        return Ok((v, o));
    }
    // 118: v is 2 bytes, o is 6 bytes. 119: v is 3 bytes, o is 5 bytes.
    let v_bits = if release == 118 { 16 } else { 24 };
    let raw = buf.read_u64()?;
    Ok(match buf.order() {
        ByteOrder::Little => (raw & ((1u64 << v_bits) - 1), raw >> v_bits),
        ByteOrder::Big => {
            let o_bits = 64 - v_bits;
            (raw >> o_bits, raw & ((1u64 << o_bits) - 1))
        }
    })
}

/// Parse the `<strls>` section into a `(v, o) → text` table.
fn parse_strls(buf: &mut DtaBuffer<'_>, release: u16) -> Result<HashMap<(u64, u64), String>> {
    let mut table = HashMap::new();
    buf.expect_tag("<strls>")?;
    while buf.peek_tag("GSO") {
        buf.skip(3)?;
        let v = buf.read_u32()? as u64;
        let o = if release == 117 { buf.read_u32()? as u64 } else { buf.read_u64()? };
        let kind = buf.read_u8()?;
        let len = buf.read_u32()? as usize;
        let payload = buf.read_bytes(len)?;
        let text = match kind {
            // 130 = ASCII/UTF-8 with trailing NUL, 129 = binary
            130 => decode_text(payload),
            _ => String::from_utf8_lossy(payload).into_owned(),
        };
        table.insert((v, o), text);
    }
    buf.expect_tag("</strls>")?;
    Ok(table)
}

/// Parse a complete tagged file.
pub fn parse(bytes: &[u8]) -> Result<Frame> {
    let mut buf = DtaBuffer::new(bytes, ByteOrder::Little);
    let TaggedHeader { header, map } = parse_header(&mut buf)?;
    let release = header.release;

    buf.set_pos(map[MAP_DATA] as usize)?;
    buf.expect_tag("<data>")?;
    let cols = read_rows(&mut buf, &header, |b| read_strl_ref(b, release))?;
    buf.expect_tag("</data>")?;

    let has_strl = header.variables.iter().any(|v| v.ty == VarType::StrL);
    let strls = if has_strl {
        buf.set_pos(map[MAP_STRLS] as usize)?;
        parse_strls(&mut buf, release)?
    } else {
        HashMap::new()
    };
    build_frame(&header, cols, |v, o| strls.get(&(v, o)).cloned())
}

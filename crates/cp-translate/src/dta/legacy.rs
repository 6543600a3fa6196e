//! Fixed-header `.dta` layout (releases 113, 114, 115).
//!
//! ```text
//! release u8 | byteorder u8 (1=HILO, 2=LOHI) | filetype u8 | pad u8
//! nvar u16 | nobs u32 | data_label [81] | time_stamp [18]
//! typlist [nvar] | varlist [nvar × 33] | srtlist [(nvar+1) × 2]
//! fmtlist [nvar × 12|49] | lbllist [nvar × 33]
//! expansion fields (type u8, len i32)* terminated by (0, 0)
//! data [nobs × record]
//! ```

use cp_core::Frame;

use super::buffer::{ByteOrder, DtaBuffer};
use super::{DtaError, DtaHeader, Result, VarSpec, VarType, build_frame, read_rows};

fn type_from_code(code: u8) -> Result<VarType> {
    Ok(match code {
        1..=244 => VarType::Str(code as usize),
        251 => VarType::Byte,
        252 => VarType::Int,
        253 => VarType::Long,
        254 => VarType::Float,
        255 => VarType::Double,
        other => return Err(DtaError::Malformed(format!("unknown legacy type code {}", other))),
    })
}

/// Parse the header and variable descriptors, leaving the cursor at the data section.
pub fn parse_header(buf: &mut DtaBuffer<'_>) -> Result<DtaHeader> {
    let release = buf.read_u8()? as u16;
    if !(113..=115).contains(&release) {
        return Err(DtaError::UnsupportedRelease(release));
    }
    let order = match buf.read_u8()? {
        1 => ByteOrder::Big,
        2 => ByteOrder::Little,
        other => return Err(DtaError::Malformed(format!("byte order flag {}", other))),
    };
    buf.set_order(order);
    let _filetype = buf.read_u8()?;
    let _pad = buf.read_u8()?;
    let nvar = buf.read_u16()? as usize;
    let nobs = buf.read_u32()? as usize;
    buf.skip(81)?; // data label
    buf.skip(18)?; // time stamp

    let codes = buf.read_bytes(nvar)?.to_vec();
    let mut variables = Vec::with_capacity(nvar);
    for code in codes {
        let ty = type_from_code(code)?;
        variables.push(VarSpec { name: String::new(), ty });
    }
    for var in variables.iter_mut() {
        var.name = buf.read_fixed_str(33)?;
    }
    buf.skip(2 * (nvar + 1))?; // sort list
    let fmt_width = if release == 113 { 12 } else { 49 };
    buf.skip(nvar * fmt_width)?;
    buf.skip(nvar * 33)?; // value label names

    loop {
        let kind = buf.read_u8()?;
        let len = buf.read_i32()?;
        if kind == 0 && len == 0 {
            break;
        }
        if len < 0 {
            return Err(DtaError::Malformed(format!("negative expansion field length {}", len)));
        }
        buf.skip(len as usize)?;
    }

    Ok(DtaHeader { release, n_obs: nobs, variables })
}

/// Parse a complete legacy file.
pub fn parse(bytes: &[u8]) -> Result<Frame> {
    let mut buf = DtaBuffer::new(bytes, ByteOrder::Little);
    let header = parse_header(&mut buf)?;
    let cols = read_rows(&mut buf, &header, |_| {
        Err(DtaError::Malformed("strL is not valid in legacy releases".into()))
    })?;
    build_frame(&header, cols, |_, _| None)
}

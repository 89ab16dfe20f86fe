//! Parameter control commands.
//!
//! Raw commands use the classic ioctl layout `(MAGIC << 8) | nr`. The "set" and
//! "tell" forms both install a value, "get" and "query" both read one, and
//! "exchange" and "shift" install a value and hand back the previous one.

use crate::error::{Error, Result};

pub const IOC_MAGIC: u8 = b'k';

pub const IOC_RESET: u32 = cmd(0);
pub const IOC_SQUANTUM: u32 = cmd(1);
pub const IOC_SQSET: u32 = cmd(2);
pub const IOC_TQUANTUM: u32 = cmd(3);
pub const IOC_TQSET: u32 = cmd(4);
pub const IOC_GQUANTUM: u32 = cmd(5);
pub const IOC_GQSET: u32 = cmd(6);
pub const IOC_QQUANTUM: u32 = cmd(7);
pub const IOC_QQSET: u32 = cmd(8);
pub const IOC_XQUANTUM: u32 = cmd(9);
pub const IOC_XQSET: u32 = cmd(10);
pub const IOC_HQUANTUM: u32 = cmd(11);
pub const IOC_HQSET: u32 = cmd(12);

const fn cmd(nr: u8) -> u32 {
    ((IOC_MAGIC as u32) << 8) | nr as u32
}

/// A decoded control operation on one store's tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    /// Restore the configured quantum and qset
    Reset,
    SetQuantum(usize),
    GetQuantum,
    ExchangeQuantum(usize),
    ShiftQuantum(usize),
    SetQset(usize),
    GetQset,
    ExchangeQset(usize),
    ShiftQset(usize),
}

impl ControlOp {
    /// Decodes a raw command and its argument.
    pub fn decode(cmd: u32, arg: i64) -> Result<Self> {
        if cmd >> 8 != IOC_MAGIC as u32 {
            return Err(Error::NotSupported(cmd));
        }
        let value = || {
            usize::try_from(arg).map_err(|_| {
                Error::InvalidArgument(format!("control argument {} is negative", arg))
            })
        };
        let op = match cmd {
            IOC_RESET => ControlOp::Reset,
            IOC_SQUANTUM | IOC_TQUANTUM => ControlOp::SetQuantum(value()?),
            IOC_GQUANTUM | IOC_QQUANTUM => ControlOp::GetQuantum,
            IOC_XQUANTUM => ControlOp::ExchangeQuantum(value()?),
            IOC_HQUANTUM => ControlOp::ShiftQuantum(value()?),
            IOC_SQSET | IOC_TQSET => ControlOp::SetQset(value()?),
            IOC_GQSET | IOC_QQSET => ControlOp::GetQset,
            IOC_XQSET => ControlOp::ExchangeQset(value()?),
            IOC_HQSET => ControlOp::ShiftQset(value()?),
            _ => return Err(Error::NotSupported(cmd)),
        };
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pairs_collapse() {
        assert_eq!(
            ControlOp::decode(IOC_SQUANTUM, 10).unwrap(),
            ControlOp::SetQuantum(10)
        );
        assert_eq!(
            ControlOp::decode(IOC_TQUANTUM, 10).unwrap(),
            ControlOp::SetQuantum(10)
        );
        assert_eq!(ControlOp::decode(IOC_GQSET, 0).unwrap(), ControlOp::GetQset);
        assert_eq!(ControlOp::decode(IOC_QQSET, 99).unwrap(), ControlOp::GetQset);
        assert_eq!(
            ControlOp::decode(IOC_XQSET, 3).unwrap(),
            ControlOp::ExchangeQset(3)
        );
        assert_eq!(
            ControlOp::decode(IOC_HQUANTUM, 3).unwrap(),
            ControlOp::ShiftQuantum(3)
        );
        assert_eq!(ControlOp::decode(IOC_RESET, 0).unwrap(), ControlOp::Reset);
    }

    #[test]
    fn test_decode_unknown_is_not_supported() {
        assert_eq!(ControlOp::decode(cmd(13), 0), Err(Error::NotSupported(cmd(13))));
        assert_eq!(ControlOp::decode(0x7101, 0), Err(Error::NotSupported(0x7101)));
    }

    #[test]
    fn test_decode_rejects_negative_argument() {
        assert!(matches!(
            ControlOp::decode(IOC_SQUANTUM, -1),
            Err(Error::InvalidArgument(_))
        ));
        // queries ignore their argument
        assert_eq!(ControlOp::decode(IOC_GQUANTUM, -1).unwrap(), ControlOp::GetQuantum);
    }
}

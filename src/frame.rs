//! RTU frame envelope: `[station][PDU][crc lo][crc hi]`
//!
//! The CRC covers the station byte through the last payload byte and is
//! stored little-endian (low byte first) after the PDU.

use bytes::BufMut;
use tracing::debug;

use crate::checksum::Checksum;
use crate::constants::{ADU_OVERHEAD, CRC_SIZE, MIN_ADU_SIZE};
use crate::error::{DiagnoseCode, ModbusError, ModbusResult};
use crate::pdu::{FunctionCode, Payload};

/// Direction a frame travels, which selects the PDU layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Master to slave
    Request,
    /// Slave to master
    Response,
}

impl FrameKind {
    #[inline]
    pub fn is_response(self) -> bool {
        self == Self::Response
    }
}

/// Station address + payload + CRC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub station: u8,
    pub payload: Payload,
    /// Trailing CRC as received, or as last set by [`apply_crc`](Self::apply_crc)
    pub crc: u16,
}

impl Frame {
    pub fn new(station: u8, payload: Payload) -> Self {
        Self {
            station,
            payload,
            crc: 0,
        }
    }

    /// Reset to a zero-initialised request for `function`
    pub fn create_request(&mut self, function: FunctionCode) {
        self.payload = Payload::new_request(function);
        self.crc = 0;
    }

    /// Reset to a zero-initialised response for `function`
    pub fn create_response(&mut self, function: FunctionCode) {
        self.payload = Payload::new_response(function);
        self.crc = 0;
    }

    /// Reset to a diagnose answering `function` (raw code, flag optional)
    pub fn create_diagnose(&mut self, function: u8, code: DiagnoseCode) {
        self.payload = Payload::diagnose(function, code);
        self.crc = 0;
    }

    #[inline]
    pub fn function_code(&self) -> u8 {
        self.payload.function_code()
    }

    /// Decode a complete ADU.
    ///
    /// The trailing CRC is stored but not checked; see
    /// [`check_raw_crc`](Self::check_raw_crc) and [`verify_crc`](Self::verify_crc).
    pub fn decode(adu: &[u8], kind: FrameKind) -> ModbusResult<Self> {
        if adu.len() < MIN_ADU_SIZE {
            return Err(ModbusError::frame(format!(
                "ADU too short: {} bytes (min {})",
                adu.len(),
                MIN_ADU_SIZE
            )));
        }
        let (body, crc) = adu.split_at(adu.len() - CRC_SIZE);
        let mut pdu = &body[1..];
        let fc = pdu[0];
        pdu = &pdu[1..];
        let payload = Payload::decode(fc, kind.is_response(), &mut pdu)?;
        Ok(Self {
            station: body[0],
            payload,
            crc: u16::from_le_bytes([crc[0], crc[1]]),
        })
    }

    /// Compare the trailing CRC of a raw ADU with the computed one
    pub fn check_raw_crc<C: Checksum + ?Sized>(adu: &[u8], checksum: &mut C) -> ModbusResult<()> {
        if adu.len() < MIN_ADU_SIZE {
            return Err(ModbusError::frame(format!(
                "ADU too short: {} bytes (min {})",
                adu.len(),
                MIN_ADU_SIZE
            )));
        }
        let (body, crc) = adu.split_at(adu.len() - CRC_SIZE);
        let actual = u16::from_le_bytes([crc[0], crc[1]]);
        let expected = checksum.compute(body);
        if expected != actual {
            return Err(ModbusError::CrcMismatch { expected, actual });
        }
        Ok(())
    }

    /// Station byte followed by the encoded PDU
    fn body(&self) -> ModbusResult<Vec<u8>> {
        let mut body = Vec::with_capacity(1 + self.payload.encoded_len());
        body.put_u8(self.station);
        self.payload.encode(&mut body)?;
        Ok(body)
    }

    /// Whether the stored CRC matches station + PDU
    pub fn verify_crc<C: Checksum + ?Sized>(&self, checksum: &mut C) -> ModbusResult<bool> {
        let body = self.body()?;
        Ok(checksum.compute(&body) == self.crc)
    }

    /// Compute and store the CRC over station + PDU
    pub fn apply_crc<C: Checksum + ?Sized>(&mut self, checksum: &mut C) -> ModbusResult<u16> {
        let body = self.body()?;
        self.crc = checksum.compute(&body);
        Ok(self.crc)
    }

    /// Serialize station, PDU and stored CRC
    pub fn write(&self, out: &mut impl BufMut) -> ModbusResult<()> {
        out.put_u8(self.station);
        self.payload.encode(out)?;
        out.put_u16_le(self.crc);
        Ok(())
    }

    pub fn to_bytes(&self) -> ModbusResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write(&mut out)?;
        Ok(out)
    }

    /// ADU length on the wire
    #[inline]
    pub fn encoded_len(&self) -> usize {
        ADU_OVERHEAD + self.payload.encoded_len()
    }

    /// Apply the CRC and serialize in one step
    pub fn seal<C: Checksum + ?Sized>(&mut self, checksum: &mut C) -> ModbusResult<Vec<u8>> {
        self.apply_crc(checksum)?;
        let bytes = self.to_bytes()?;
        debug!(
            "Frame sealed: station={}, FC={:02X}, {} bytes",
            self.station,
            self.function_code(),
            bytes.len()
        );
        Ok(bytes)
    }
}

/// Space separated upper-case hex dump
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ModbusCrc;
    use crate::pdu::AddressRange;

    #[test]
    fn test_seal_matches_known_vector() {
        let mut frame = Frame::new(0x01, Payload::ReadHoldingRegisters(AddressRange::new(0, 10)));
        let bytes = frame.seal(&mut ModbusCrc::new()).unwrap();
        assert_eq!(
            bytes,
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]
        );
        assert_eq!(frame.crc, 0xCDC5);
    }

    #[test]
    fn test_decode_and_verify() {
        let adu = [0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87];
        let frame = Frame::decode(&adu, FrameKind::Request).unwrap();
        assert_eq!(frame.station, 0x11);
        assert_eq!(
            frame.payload,
            Payload::ReadHoldingRegisters(AddressRange::new(0x6B, 3))
        );
        let mut crc = ModbusCrc::new();
        assert!(frame.verify_crc(&mut crc).unwrap());
        assert!(Frame::check_raw_crc(&adu, &mut crc).is_ok());
        assert_eq!(frame.to_bytes().unwrap(), adu.to_vec());
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let adu = [0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x88];
        let mut crc = ModbusCrc::new();
        assert!(matches!(
            Frame::check_raw_crc(&adu, &mut crc),
            Err(ModbusError::CrcMismatch {
                expected: 0x8776,
                actual: 0x8876
            })
        ));
        let frame = Frame::decode(&adu, FrameKind::Request).unwrap();
        assert!(!frame.verify_crc(&mut crc).unwrap());
    }

    #[test]
    fn test_verify_covers_coil_padding_as_received() {
        // three coils, sender left the five padding bits set
        let body = [0x05, 0x0F, 0x00, 0x00, 0x00, 0x03, 0x01, 0xFF];
        let mut adu = body.to_vec();
        adu.extend_from_slice(&ModbusCrc::checksum(&body).to_le_bytes());

        let mut crc = ModbusCrc::new();
        assert!(Frame::check_raw_crc(&adu, &mut crc).is_ok());
        let frame = Frame::decode(&adu, FrameKind::Request).unwrap();
        assert!(frame.verify_crc(&mut crc).unwrap());
        assert_eq!(frame.to_bytes().unwrap(), adu);
        assert_eq!(frame.payload.value_count(), 3);
    }

    #[test]
    fn test_create_resets_payload() {
        let mut frame = Frame::new(5, Payload::ReadCoils(AddressRange::new(1, 2)));
        frame.crc = 0x1234;
        frame.create_response(FunctionCode::ReadHoldingRegisters);
        assert_eq!(frame.station, 5);
        assert_eq!(frame.crc, 0);
        assert_eq!(frame.payload.value_count(), 0);

        frame.create_diagnose(0x0F, DiagnoseCode::InvalidDataValue);
        assert_eq!(frame.function_code(), 0x8F);
        assert_eq!(frame.encoded_len(), 5);

        frame.create_request(FunctionCode::WriteSingleRegister);
        assert_eq!(frame.payload.to_bytes().unwrap(), vec![0x06, 0, 0, 0, 0]);
    }

    #[test]
    fn test_decode_short_adu() {
        assert!(Frame::decode(&[0x01, 0x03, 0x00], FrameKind::Request).is_err());
        assert!(Frame::check_raw_crc(&[0x01], &mut ModbusCrc::new()).is_err());
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(format_hex_packet(&[0x01, 0xAB, 0x0F]), "01 AB 0F");
    }
}

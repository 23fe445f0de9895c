//! Round-trip tests for the three packed head layouts.

#[cfg(test)]
mod tests {
    use crate::codec::*;

    #[test]
    fn request_head_round_trip() {
        let head = RequestHead::new(Opcode::Set, 5, 16, 100).unwrap();
        let decoded = RequestHead::decode(head.encode());
        assert_eq!(decoded, head);
        assert_eq!(decoded.opcode().unwrap(), Opcode::Set);
        assert_eq!(decoded.payload_len(), 121);
    }

    #[test]
    fn request_head_round_trip_at_field_limits() {
        let head =
            RequestHead::new(Opcode::Err, MAX_TABLE_NAME_LEN, MAX_KEY_LEN, MAX_VALUE_LEN).unwrap();
        let decoded = RequestHead::decode(head.encode());
        assert_eq!(decoded.tlen, MAX_TABLE_NAME_LEN);
        assert_eq!(decoded.klen, MAX_KEY_LEN);
        assert_eq!(decoded.vlen, MAX_VALUE_LEN);
        assert_eq!(decoded.opcode().unwrap(), Opcode::Err);
    }

    #[test]
    fn request_head_round_trip_zeroes() {
        let head = RequestHead::new(Opcode::Quit, 0, 0, 0).unwrap();
        let decoded = RequestHead::decode(head.encode());
        assert_eq!(decoded, head);
        assert_eq!(decoded.payload_len(), 0);
    }

    #[test]
    fn request_head_rejects_oversized_fields() {
        assert_eq!(
            RequestHead::new(Opcode::Set, MAX_TABLE_NAME_LEN + 1, 0, 0),
            Err(CodecError::TableTooLong(MAX_TABLE_NAME_LEN + 1))
        );
        assert_eq!(
            RequestHead::new(Opcode::Set, 0, MAX_KEY_LEN + 1, 0),
            Err(CodecError::KeyTooLong(MAX_KEY_LEN + 1))
        );
        assert_eq!(
            RequestHead::new(Opcode::Set, 0, 0, MAX_VALUE_LEN + 1),
            Err(CodecError::ValueTooLong(MAX_VALUE_LEN + 1))
        );
    }

    #[test]
    fn every_opcode_survives_a_head_round_trip() {
        for code in [
            Opcode::Get,
            Opcode::Set,
            Opcode::Del,
            Opcode::Size,
            Opcode::Keys,
            Opcode::Drop,
            Opcode::MGet,
            Opcode::MSet,
            Opcode::MDel,
            Opcode::Quit,
            Opcode::Ok,
            Opcode::Err,
        ] {
            let head = RequestHead::new(code, 1, 2, 3).unwrap();
            assert_eq!(RequestHead::decode(head.encode()).opcode().unwrap(), code);
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let head = RequestHead {
            code: 0x7E,
            tlen: 0,
            klen: 0,
            vlen: 0,
        };
        let decoded = RequestHead::decode(head.encode());
        assert_eq!(decoded.opcode(), Err(CodecError::UnknownOpcode(0x7E)));
    }

    #[test]
    fn multi_bit_marks_batched_codes() {
        assert!(Opcode::MGet.is_multi());
        assert!(Opcode::MSet.is_multi());
        assert!(Opcode::MDel.is_multi());
        assert!(!Opcode::Get.is_multi());
        assert!(!Opcode::Quit.is_multi());
    }

    #[test]
    fn blx_head_round_trip() {
        let head = BlxHead {
            slot: 4095,
            klen: MAX_KEY_LEN,
            vlen: u32::MAX as usize,
        };
        assert_eq!(BlxHead::decode(head.encode()), head);

        let head = BlxHead {
            slot: 0,
            klen: 0,
            vlen: 0,
        };
        assert_eq!(BlxHead::decode(head.encode()), head);
    }

    #[test]
    fn blx_head_fields_do_not_bleed() {
        let head = BlxHead {
            slot: 0x0AB,
            klen: 0xF_FFFF,
            vlen: 1,
        };
        let decoded = BlxHead::decode(head.encode());
        assert_eq!(decoded.slot, 0x0AB);
        assert_eq!(decoded.klen, 0xF_FFFF);
        assert_eq!(decoded.vlen, 1);
    }

    #[test]
    fn index_entry_round_trip() {
        for (offset, klen) in [
            (0u64, 0usize),
            (16, 1),
            ((1 << OFFSET_BITS) - 1, MAX_KEY_LEN),
            (123_456_789, 42),
        ] {
            assert_eq!(
                unpack_index_entry(pack_index_entry(offset, klen)),
                (offset, klen)
            );
        }
    }
}

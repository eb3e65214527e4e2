//! Property tests driven by the shared generators.

use proptest::prelude::*;

use haversack_testkit::generators::{chunk_data, chunk_offer, chunk_request};
use haversack_wire::{decode_pdu, encode_pdu, Pdu};

proptest! {
    #[test]
    fn generated_offers_survive_the_wire(offer in chunk_offer()) {
        let pdu = Pdu::Offer(offer);
        prop_assert!(pdu.validate_limits().is_ok());
        let frame = encode_pdu(&pdu).unwrap();
        let (decoded, consumed) = decode_pdu(&frame).unwrap();
        prop_assert_eq!(consumed, frame.len());
        prop_assert_eq!(decoded, pdu);
    }

    #[test]
    fn generated_requests_survive_the_wire(request in chunk_request()) {
        let pdu = Pdu::Request(request);
        let frame = encode_pdu(&pdu).unwrap();
        let (decoded, _) = decode_pdu(&frame).unwrap();
        prop_assert_eq!(decoded, pdu);
    }

    #[test]
    fn generated_data_stays_within_limits(data in chunk_data()) {
        let pdu = Pdu::Data(data);
        prop_assert!(pdu.validate_limits().is_ok());
        let frame = encode_pdu(&pdu).unwrap();
        let (decoded, _) = decode_pdu(&frame).unwrap();
        prop_assert_eq!(decoded, pdu);
    }
}

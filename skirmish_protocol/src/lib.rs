// skirmish_protocol: wire protocol for Skirmish netplay sessions.
//
// This crate defines everything host and joiner must agree on byte-for-byte:
// ids, the fixed message header, the reserved message kinds, the positional
// payload codec, and the session descriptor record used by discovery. It
// owns no sockets; `skirmish_netplay` builds the transport and session layer
// on top of it.
//
// Module overview:
// - `types.rs`:      `PlayerId` (range-checked dpid), `PlayerFlags`,
//                    `Destination`, table capacity and broadcast sentinel.
// - `header.rs`:     Five-byte frame header, buffer capacity, max payload.
// - `message.rs`:    `MessageKind` (reserved system codes + application
//                    codes) and the owned `Message` frame.
// - `codec.rs`:      `MessageWriter` / `MessageReader` field-by-field codec.
// - `descriptor.rs`: `SessionDescriptor` record and `DiscoveryCommand` words.
//
// Design decisions:
// - **Positional, not self-describing.** Payloads carry no tags; readers must
//   mirror writers. This keeps frames small and the header fixed.
// - **Validated ids at every decode.** Raw id bytes become `PlayerId` only
//   through range-checked constructors.

pub mod codec;
pub mod descriptor;
pub mod header;
pub mod message;
pub mod types;

pub use codec::{CodecError, MessageReader, MessageWriter};
pub use descriptor::{DescriptorError, DiscoveryCommand, SessionDescriptor};
pub use header::{HEADER_SIZE, MAX_PAYLOAD_SIZE, MessageHeader, NET_BUFFER_SIZE};
pub use message::{FILE_MSG, Message, MessageKind};
pub use types::{BROADCAST, Destination, MAX_CONNECTED_PLAYERS, MAX_NAME_LEN, PlayerFlags, PlayerId};

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a PLAYER_INFO payload, frame it, parse the frame, decode.
    #[test]
    fn player_info_survives_framing() {
        let mut w = MessageWriter::begin(MessageKind::PlayerInfo, BROADCAST);
        w.u8(2)
            .and_then(|w| w.bool(true))
            .and_then(|w| w.string("Bob", MAX_NAME_LEN))
            .and_then(|w| w.u32(PlayerFlags::SPECTATOR.bits()))
            .unwrap();
        let mut msg = w.end();
        msg.set_route(BROADCAST, 0);

        let parsed = Message::from_frame(&msg.to_frame()).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.kind(), MessageKind::PlayerInfo);

        let mut r = MessageReader::begin(&parsed);
        assert_eq!(PlayerId::new(r.u8().unwrap()), PlayerId::new(2));
        assert!(r.bool().unwrap());
        assert_eq!(r.string(MAX_NAME_LEN).unwrap(), "Bob");
        assert_eq!(PlayerFlags(r.u32().unwrap()), PlayerFlags::SPECTATOR);
        assert_eq!(r.end(), 0);
    }

    #[test]
    fn largest_payload_fills_buffer_exactly() {
        let mut w = MessageWriter::begin(MessageKind::Application(7), 1);
        w.bin(&[0xAB; MAX_PAYLOAD_SIZE]).unwrap();
        let msg = w.end();
        assert_eq!(msg.frame_len(), NET_BUFFER_SIZE);
        assert_eq!(msg.to_frame().len(), NET_BUFFER_SIZE);
    }
}

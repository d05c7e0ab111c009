pub mod events;
pub mod model;
pub mod payloads;
pub mod wire;

pub use model::{Anchor, Connection, ConnectionStatus, Repository, TriggerMode};
pub use wire::{decode_frame, encode_frame, FrameError, SocketFrame, DEFAULT_MAX_FRAME_BYTES};

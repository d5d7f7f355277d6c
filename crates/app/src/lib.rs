//! Camera object guidance server: capture, detection, announcements, and
//! text reading streamed to clients over WebSocket.

pub mod guide;

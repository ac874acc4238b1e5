// ABOUTME: Example demonstrating the frame codec in isolation, with no network involved
// ABOUTME: Shows serializing a SEND frame and parsing it back, including a chunk-split parse

use bytes::BytesMut;
use stompman::codec::{encode_frame, FrameParser};
use stompman::frame::{Command, Frame};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("STOMP codec example");
    println!("====================");

    let frame = Frame::with_body(Command::Send, b"Hello, World!".to_vec())
        .header("destination", "/queue/greetings")
        .header("content-type", "text/plain")
        .header("content-length", "13");

    let mut encoded = BytesMut::new();
    encode_frame(&frame, &mut encoded);
    println!("encoded {} bytes: {:?}", encoded.len(), encoded);

    // Feed the bytes back in awkward, arbitrary-sized chunks to show the
    // parser is restartable across chunk boundaries.
    let mut parser = FrameParser::new();
    let mut parsed = Vec::new();
    for chunk in encoded.chunks(5) {
        let mut buf = BytesMut::from(chunk);
        parsed.extend(parser.parse_frames_from_chunk(&mut buf)?);
    }

    for frame in &parsed {
        println!(
            "parsed: {:?} destination={:?} body={:?}",
            frame.command(),
            frame.get_header("destination"),
            String::from_utf8_lossy(frame.body()),
        );
    }

    Ok(())
}

//! Wire format shared by client and server.
//!
//! There is no framing: a request is the UTF-8 bytes of the space-joined
//! argument vector, a response is the UTF-8 bytes of the reply text, and a
//! message is "everything the peer had sent by the time we were woken up".
//! An argument containing a space cannot be told apart from two arguments.

use std::io;

use tokio::net::unix::OwnedReadHalf;

/// Build the request line for an argument vector.
pub fn request_line<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = String::new();
    for (i, arg) in args.into_iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(arg.as_ref());
    }
    line
}

/// Wait until the peer sends something, then take everything already
/// buffered, up to `max` bytes.
///
/// An empty result means the peer closed its side.
pub async fn read_available(reader: &OwnedReadHalf, max: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; max];
    let mut filled = loop {
        reader.readable().await?;
        match reader.try_read(&mut buf) {
            Ok(n) => break n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    };

    while filled > 0 && filled < max {
        match reader.try_read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }

    buf.truncate(filled);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    #[test]
    fn test_request_line_joins_with_spaces() {
        assert_eq!(
            request_line(["solo", "--logging-rules", "debug"]),
            "solo --logging-rules debug"
        );
        assert_eq!(request_line(Vec::<String>::new()), "");
    }

    #[tokio::test]
    async fn test_read_available_collects_buffered_writes() {
        let (a, b) = UnixStream::pair().unwrap();
        let (reader, _keep) = a.into_split();
        let (_unused, mut writer) = b.into_split();

        writer.write_all(b"hello ").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let bytes = read_available(&reader, 1024).await.unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn test_read_available_respects_limit() {
        let (a, b) = UnixStream::pair().unwrap();
        let (reader, _keep) = a.into_split();
        let (_unused, mut writer) = b.into_split();

        writer.write_all(b"0123456789").await.unwrap();
        let first = read_available(&reader, 4).await.unwrap();
        assert_eq!(first, b"0123");
        let rest = read_available(&reader, 64).await.unwrap();
        assert_eq!(rest, b"456789");
    }

    #[tokio::test]
    async fn test_read_available_reports_close() {
        let (a, b) = UnixStream::pair().unwrap();
        let (reader, _keep) = a.into_split();
        drop(b);

        let bytes = read_available(&reader, 16).await.unwrap();
        assert!(bytes.is_empty());
    }
}

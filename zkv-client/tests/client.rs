use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use bytes::BytesMut;
use zkv_client::{ClientConfig, ClientError, KvClient, Ttl};
use zkv_common::{encode_response, try_parse_request, Reply, Status};

fn spawn_server(
    expected_commands: usize,
    handler: fn(usize, Vec<Vec<u8>>, &mut TcpStream),
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut buf = BytesMut::new();
        for idx in 0..expected_commands {
            let args = read_command(&mut stream, &mut buf).expect("read command");
            handler(idx, args, &mut stream);
        }
    });

    addr
}

fn read_command(stream: &mut TcpStream, buf: &mut BytesMut) -> std::io::Result<Vec<Vec<u8>>> {
    loop {
        if let Some(args) = try_parse_request(buf)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?
        {
            return Ok(args);
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn respond(stream: &mut TcpStream, status: Status, reply: &Reply) {
    let mut out = BytesMut::new();
    encode_response(status, reply, &mut out);
    let _ = stream.write_all(&out);
    let _ = stream.flush();
}

fn client_with_addr(addr: String) -> KvClient {
    let config = ClientConfig {
        addr,
        max_idle: 1,
        max_total: 1,
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        connect_timeout: Some(Duration::from_secs(1)),
    };
    KvClient::with_config(config).expect("client")
}

#[test]
fn client_set_get_roundtrip() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args[0], b"SET");
            assert_eq!(args[1], b"key");
            assert_eq!(args[2], b"value");
            respond(stream, Status::Ok, &Reply::Nil);
        } else {
            assert_eq!(args[0], b"GET");
            assert_eq!(args[1], b"key");
            respond(stream, Status::Ok, &Reply::Str(b"value".to_vec()));
        }
    });

    let client = client_with_addr(addr);
    client.set(b"key", b"value").expect("set");
    let value = client.get(b"key").expect("get");
    assert_eq!(value, Some(b"value".to_vec()));
}

#[test]
fn client_ttl_and_delete() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args[0], b"TTL");
            assert_eq!(args[1], b"key");
            respond(stream, Status::Ok, &Reply::Int(5_000));
        } else {
            assert_eq!(args[0], b"DEL");
            assert_eq!(args[1], b"key");
            respond(stream, Status::Ok, &Reply::Int(1));
        }
    });

    let client = client_with_addr(addr);
    let ttl = client.ttl(b"key").expect("ttl");
    assert_eq!(ttl, Ttl::ExpiresIn(Duration::from_millis(5_000)));
    let removed = client.del(b"key").expect("delete");
    assert!(removed);
}

#[test]
fn client_surfaces_error_statuses() {
    let addr = spawn_server(1, |_, args, stream| {
        assert_eq!(args[0], b"GET");
        respond(stream, Status::BadType, &Reply::Nil);
    });

    let client = client_with_addr(addr);
    match client.get(b"ranked") {
        Err(ClientError::Server { status }) => assert_eq!(status, Status::BadType),
        other => panic!("expected server error, got {other:?}"),
    }
}

#[test]
fn client_parses_zquery_rows() {
    let addr = spawn_server(1, |_, args, stream| {
        assert_eq!(args[0], b"ZQUERY");
        respond(
            stream,
            Status::Ok,
            &Reply::Arr(vec![
                Reply::Str(b"alice".to_vec()),
                Reply::Dbl(100.0),
                Reply::Str(b"bob".to_vec()),
                Reply::Dbl(200.0),
            ]),
        );
    });

    let client = client_with_addr(addr);
    let rows = client.zquery(b"lb", 0.0, b"", 0, 10).expect("zquery");
    assert_eq!(
        rows,
        vec![(b"alice".to_vec(), 100.0), (b"bob".to_vec(), 200.0)]
    );
}

use std::ffi::OsStr;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::os::unix::ffi::OsStrExt;
use std::time::Duration;

use pico_ftp_server::{Server, ServerConfig, ServerError};
use tempfile::TempDir;

const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// A running server rooted in a fresh temporary directory.
struct TestServer {
    server: Server,
    root: TempDir,
}

impl TestServer {
    fn start() -> Self {
        Self::start_with(|_| {})
    }

    fn start_with(tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let root = TempDir::new().unwrap();
        let mut config = ServerConfig {
            bind_address: "127.0.0.1".to_string(),
            control_port: 0,
            server_root: root.path().to_string_lossy().into_owned(),
            idle_poll_ms: 10,
            ..ServerConfig::default()
        };
        tweak(&mut config);

        let server = Server::new(config);
        server.start().unwrap();
        Self { server, root }
    }

    fn addr(&self) -> SocketAddr {
        self.server.local_addr().unwrap()
    }

    fn connect(&self) -> FtpClient {
        let mut client = FtpClient::connect(self.addr());
        assert_eq!(client.read_reply(), "220 Hello!");
        client
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.root.path().join(name)
    }
}

/// Minimal control connection client.
struct FtpClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl FtpClient {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        let writer = stream.try_clone().unwrap();
        Self {
            reader: BufReader::new(stream),
            writer,
        }
    }

    fn send(&mut self, command: &str) {
        self.writer
            .write_all(format!("{}\r\n", command).as_bytes())
            .unwrap();
        self.writer.flush().unwrap();
    }

    /// Read one complete reply, multi-line replies joined with `\n`.
    fn read_reply(&mut self) -> String {
        let mut lines: Vec<String> = Vec::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).unwrap();
            assert!(n > 0, "connection closed, got {:?}", lines);
            let line = line.trim_end_matches(['\r', '\n']).to_string();

            let done = match lines.first() {
                None => line.as_bytes().get(3) != Some(&b'-'),
                Some(first) => line.len() >= 4 && line[..3] == first[..3] && &line[3..4] == " ",
            };
            lines.push(line);
            if done {
                return lines.join("\n");
            }
        }
    }

    fn command(&mut self, command: &str) -> String {
        self.send(command);
        self.read_reply()
    }

    /// PASV, then connect to the advertised address.
    fn passive(&mut self) -> TcpStream {
        let reply = self.command("PASV");
        assert!(reply.starts_with("227 "), "unexpected reply {reply:?}");
        let data = TcpStream::connect(pasv_addr(&reply)).unwrap();
        data.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        data
    }

    /// Run a transfer command on a fresh passive connection and collect
    /// what arrives on the data channel.
    fn download(&mut self, command: &str) -> Vec<u8> {
        let mut data = self.passive();
        assert_eq!(self.command(command), "150 Ready");
        let mut received = Vec::new();
        data.read_to_end(&mut received).unwrap();
        drop(data);
        assert_eq!(self.read_reply(), "226 OK");
        received
    }

    fn upload(&mut self, command: &str, contents: &[u8]) {
        let mut data = self.passive();
        assert_eq!(self.command(command), "150 Ready");
        data.write_all(contents).unwrap();
        drop(data);
        assert_eq!(self.read_reply(), "226 OK");
    }
}

/// Address advertised by a 227 reply.
fn pasv_addr(reply: &str) -> SocketAddr {
    let fields: Vec<u8> = reply[4..]
        .split(',')
        .map(|field| field.trim().parse().unwrap())
        .collect();
    assert_eq!(fields.len(), 6);
    let ip = Ipv4Addr::new(fields[0], fields[1], fields[2], fields[3]);
    SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be_bytes([fields[4], fields[5]])))
}

fn sorted_lines(bytes: &[u8]) -> Vec<String> {
    let mut lines: Vec<String> = String::from_utf8_lossy(bytes)
        .split("\r\n")
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    lines.sort();
    lines
}

#[test]
fn test_greeting_and_login() {
    let server = TestServer::start();
    let mut client = server.connect();

    assert_eq!(client.command("USER anonymous"), "230 OK");
    assert_eq!(client.command("PASS secret"), "230 OK");
    assert_eq!(client.command("SYST"), "215 UNIX Type: L8");
    assert_eq!(client.command("PWD"), "257 \"/\"");
    assert_eq!(client.command("NOOP"), "200 OK");
}

#[test]
fn test_unknown_command() {
    let server = TestServer::start();
    let mut client = server.connect();

    assert_eq!(client.command("BOGUS some arg"), "502 Invalid command \"BOGUS some arg\"");
    assert_eq!(client.command("XYZZY"), "502 Invalid command \"XYZZY\"");
    assert_eq!(client.command("noop"), "200 OK");
}

#[test]
fn test_transfer_requires_data_channel() {
    let server = TestServer::start();
    let mut client = server.connect();

    assert_eq!(client.command("STOR file.bin"), "503 Bad sequence of commands");
    assert_eq!(client.command("RETR file.bin"), "503 Bad sequence of commands");
    assert_eq!(client.command("LIST"), "503 Bad sequence of commands");
}

#[test]
fn test_pasv_reply_uses_control_address() {
    let server = TestServer::start();
    let mut client = server.connect();

    let reply = client.command("PASV");
    assert!(reply.starts_with("227 127,0,0,1,"), "unexpected reply {reply:?}");
}

#[test]
fn test_port_argument_validation() {
    let server = TestServer::start();
    let mut client = server.connect();

    assert_eq!(client.command("PORT 127,0,0,1,4,1"), "200 OK");
    assert_eq!(client.command("PORT 127,0,0,1,4"), "501 Invalid argument");
    assert_eq!(client.command("PORT 127,0,0,256,4,1"), "501 Invalid argument");
    assert_eq!(client.command("PORT a,b,c,d,e,f"), "501 Invalid argument");
}

#[test]
fn test_store_then_retrieve() {
    let server = TestServer::start();
    let mut client = server.connect();
    let contents: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

    client.upload("STOR upload.bin", &contents);
    assert_eq!(fs::read(server.path("upload.bin")).unwrap(), contents);

    assert_eq!(client.command("SIZE upload.bin"), "213 200000");
    assert_eq!(client.download("RETR upload.bin"), contents);
}

#[test]
fn test_append() {
    let server = TestServer::start();
    fs::write(server.path("log.txt"), b"first\n").unwrap();
    let mut client = server.connect();

    client.upload("APPE log.txt", b"second\n");
    assert_eq!(fs::read(server.path("log.txt")).unwrap(), b"first\nsecond\n");
}

#[test]
fn test_rest_resumes_retrieve() {
    let server = TestServer::start();
    fs::write(server.path("digits.txt"), b"0123456789").unwrap();
    let mut client = server.connect();

    let mut data = client.passive();
    assert_eq!(client.command("REST 4"), "200 OK");
    assert_eq!(client.command("RETR digits.txt"), "150 Ready");
    let mut received = Vec::new();
    data.read_to_end(&mut received).unwrap();
    drop(data);
    assert_eq!(client.read_reply(), "226 OK");
    assert_eq!(received, b"456789");

    assert_eq!(client.command("REST x1"), "504 invalid argument");
}

#[test]
fn test_retrieve_missing_file() {
    let server = TestServer::start();
    let mut client = server.connect();

    let _data = client.passive();
    assert_eq!(client.command("RETR missing.txt"), "450 failed to open file");
    assert_eq!(client.command("NOOP"), "200 OK");
}

#[test]
fn test_listings() {
    let server = TestServer::start();
    fs::write(server.path("a.txt"), b"hello").unwrap();
    fs::create_dir(server.path("sub")).unwrap();
    let mut client = server.connect();

    let names = sorted_lines(&client.download("NLST"));
    assert_eq!(names, vec!["/a.txt", "/sub"]);

    let lines = sorted_lines(&client.download("LIST"));
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().any(|l| l.starts_with('-') && l.ends_with(" a.txt")));
    assert!(lines.iter().any(|l| l.starts_with('d') && l.ends_with(" sub")));

    let facts = sorted_lines(&client.download("MLSD"));
    assert_eq!(facts.len(), 3);
    assert!(facts.iter().any(|l| l.starts_with("Type=cdir;")));
    assert!(facts.iter().any(|l| l.starts_with("Type=file;Size=5;") && l.ends_with(" a.txt")));
    assert!(facts.iter().any(|l| l.starts_with("Type=dir;") && l.ends_with(" sub")));
}

#[test]
fn test_list_with_ls_flags() {
    let server = TestServer::start();
    fs::write(server.path("only.txt"), b"x").unwrap();
    let mut client = server.connect();

    let lines = sorted_lines(&client.download("LIST -la"));
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with(" only.txt"));
}

#[test]
fn test_mlst_and_opts() {
    let server = TestServer::start();
    fs::write(server.path("f.bin"), b"12345678").unwrap();
    let mut client = server.connect();

    let reply = client.command("MLST f.bin");
    let lines: Vec<&str> = reply.lines().collect();
    assert_eq!(lines[0], "250-Status");
    assert!(lines[1].starts_with(" Type=file;Size=8;Modify="));
    assert!(lines[1].ends_with(" /f.bin"));
    assert_eq!(lines[2], "250 End");

    assert_eq!(client.command("OPTS MLST size;type;"), "200 MLST OPTS Type;Size;");
    assert_eq!(
        client.command("MLST f.bin"),
        "250-Status\n Type=file;Size=8; /f.bin\n250 End"
    );
    assert_eq!(client.command("OPTS UTF8 ON"), "200 OK");
    assert_eq!(client.command("OPTS BOGUS"), "504 invalid argument");
}

#[test]
fn test_feat_and_help() {
    let server = TestServer::start();
    let mut client = server.connect();

    let feat = client.command("FEAT");
    assert!(feat.starts_with("211-"));
    assert!(feat.contains(" MLST Type*;Size*;Modify*;Perm*;UNIX.mode;"));
    assert!(feat.contains(" PASV"));
    assert!(feat.ends_with("211 End"));

    let help = client.command("HELP");
    assert!(help.starts_with("214-The following commands are recognized"));
    assert!(help.contains("RETR"));
    assert!(help.ends_with("214 End"));
}

#[test]
fn test_directory_navigation() {
    let server = TestServer::start();
    fs::write(server.path("plain.txt"), b"").unwrap();
    let mut client = server.connect();

    assert_eq!(client.command("MKD docs"), "250 OK");
    assert_eq!(client.command("MKD docs"), "553 File exists");
    assert_eq!(client.command("CWD docs"), "200 OK");
    assert_eq!(client.command("PWD"), "257 \"/docs\"");
    assert_eq!(client.command("CWD .."), "200 OK");
    assert_eq!(client.command("PWD"), "257 \"/\"");
    assert_eq!(client.command("CWD nowhere"), "550 unavailable");
    assert_eq!(client.command("CWD plain.txt"), "553 not a directory");
    assert_eq!(client.command("CWD ../etc"), "553 Invalid argument");
    assert_eq!(client.command("XCWD docs"), "200 OK");
    assert_eq!(client.command("CDUP"), "200 OK");
    assert_eq!(client.command("RMD docs"), "250 OK");
    assert!(!server.path("docs").exists());
}

#[test]
fn test_rename_and_delete() {
    let server = TestServer::start();
    fs::write(server.path("old.txt"), b"data").unwrap();
    let mut client = server.connect();

    assert_eq!(client.command("RNTO new.txt"), "503 Bad sequence of commands");
    assert_eq!(client.command("RNFR missing.txt"), "450 no such file or directory");

    assert_eq!(client.command("RNFR old.txt"), "350 OK");
    assert_eq!(client.command("RNTO new.txt"), "250 OK");
    assert!(server.path("new.txt").exists());
    assert!(!server.path("old.txt").exists());

    // Any other command in between cancels the rename
    assert_eq!(client.command("RNFR new.txt"), "350 OK");
    assert_eq!(client.command("NOOP"), "200 OK");
    assert_eq!(client.command("RNTO other.txt"), "503 Bad sequence of commands");

    assert_eq!(client.command("DELE new.txt"), "250 OK");
    assert_eq!(client.command("DELE new.txt"), "550 failed to delete file");
}

#[test]
fn test_size_and_mdtm() {
    let server = TestServer::start();
    fs::write(server.path("f.txt"), b"abc").unwrap();
    fs::create_dir(server.path("d")).unwrap();
    let mut client = server.connect();

    assert_eq!(client.command("SIZE f.txt"), "213 3");
    assert_eq!(client.command("SIZE d"), "550 Could not get file size.");

    let reply = client.command("MDTM f.txt");
    assert!(reply.starts_with("213 "));
    assert_eq!(reply.len(), "213 ".len() + 14);
    assert_eq!(client.command("MDTM nope"), "550 Error getting mtime");
}

#[test]
fn test_type_mode_stru() {
    let server = TestServer::start();
    let mut client = server.connect();

    assert_eq!(client.command("TYPE I"), "200 OK");
    assert_eq!(client.command("MODE S"), "200 OK");
    assert_eq!(client.command("MODE B"), "504 unavailable");
    assert_eq!(client.command("STRU F"), "200 OK");
    assert_eq!(client.command("STRU R"), "504 unavailable");
    assert_eq!(client.command("ALLO 100"), "202 superfluous command");
    assert_eq!(client.command("STOU"), "502 unavailable");
}

#[test]
fn test_status() {
    let server = TestServer::start();
    fs::write(server.path("s.txt"), b"x").unwrap();
    let mut client = server.connect();

    let reply = client.command("STAT");
    assert!(reply.starts_with("211-FTP server status\n Uptime: "));
    assert!(reply.ends_with("\n211 End"));

    let reply = client.command("STAT /");
    let lines: Vec<&str> = reply.lines().collect();
    assert_eq!(lines.first(), Some(&"213-Status"));
    assert!(lines.iter().any(|l| l.starts_with(" -") && l.ends_with(" s.txt")));
    assert_eq!(lines.last(), Some(&"213 OK"));
}

#[test]
fn test_commands_during_transfer() {
    let server = TestServer::start();
    fs::write(server.path("wait.txt"), b"x").unwrap();
    let mut client = server.connect();

    // Listener armed but the client never connects the data channel
    client.command("PASV");
    client.send("RETR wait.txt");
    assert_eq!(
        client.command("STAT"),
        "211-FTP server status\n Waiting for data connection\n211 End"
    );
    assert_eq!(client.command("NOOP"), "503 Invalid command during transfer");
    assert_eq!(client.command("NOOP"), "200 OK");

    assert_eq!(client.command("ABOR"), "225 No transfer to abort");
}

#[test]
fn test_abort_waiting_transfer() {
    let server = TestServer::start();
    fs::write(server.path("wait.txt"), b"x").unwrap();
    let mut client = server.connect();

    client.command("PASV");
    client.send("RETR wait.txt");
    assert_eq!(client.command("ABOR"), "225 Aborted");
    assert_eq!(client.read_reply(), "425 Transfer aborted");
    assert_eq!(client.command("NOOP"), "200 OK");
}

#[test]
fn test_reset_during_retrieve() {
    let server = TestServer::start();
    let big = vec![0x5a; 32 * 1024 * 1024];
    fs::write(server.path("big.bin"), &big).unwrap();
    let mut client = server.connect();

    let mut data = client.passive();
    socket2::SockRef::from(&data).set_recv_buffer_size(4096).unwrap();
    assert_eq!(client.command("RETR big.bin"), "150 Ready");

    let mut chunk = [0u8; 1024];
    data.read_exact(&mut chunk).unwrap();
    socket2::SockRef::from(&data)
        .set_linger(Some(Duration::ZERO))
        .unwrap();
    drop(data);

    let reply = client.read_reply();
    assert_eq!(reply, "426 Connection broken during transfer");
    assert_eq!(client.command("NOOP"), "200 OK");
}

#[test]
fn test_second_pasv_replaces_first() {
    let server = TestServer::start();
    fs::write(server.path("f.txt"), b"second").unwrap();
    let mut client = server.connect();

    let first = client.command("PASV");
    assert!(first.starts_with("227 "), "unexpected reply {first:?}");
    let mut data = client.passive();
    assert_ne!(pasv_addr(&first), data.peer_addr().unwrap());

    assert!(TcpStream::connect(pasv_addr(&first)).is_err());

    assert_eq!(client.command("RETR f.txt"), "150 Ready");
    let mut received = Vec::new();
    data.read_to_end(&mut received).unwrap();
    drop(data);
    assert_eq!(client.read_reply(), "226 OK");
    assert_eq!(received, b"second");
}

#[test]
fn test_port_retrieve() {
    let server = TestServer::start();
    fs::write(server.path("port.txt"), b"hello port").unwrap();
    let mut client = server.connect();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let [hi, lo] = listener.local_addr().unwrap().port().to_be_bytes();
    assert_eq!(client.command(&format!("PORT 127,0,0,1,{hi},{lo}")), "200 OK");

    assert_eq!(client.command("RETR port.txt"), "150 Ready");
    let (mut data, _) = listener.accept().unwrap();
    data.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
    let mut received = Vec::new();
    data.read_to_end(&mut received).unwrap();
    drop(data);

    assert_eq!(client.read_reply(), "226 OK");
    assert_eq!(received, b"hello port");
}

#[test]
fn test_urgent_abort_during_retrieve() {
    let server = TestServer::start();
    fs::write(server.path("big.bin"), vec![0x5a; 32 * 1024 * 1024]).unwrap();
    let mut client = server.connect();

    let data = client.passive();
    socket2::SockRef::from(&data).set_recv_buffer_size(4096).unwrap();
    assert_eq!(client.command("RETR big.bin"), "150 Ready");

    // Telnet IAC IP IAC in band, then the data mark as urgent data
    client.writer.write_all(&[0xff, 0xf4, 0xff]).unwrap();
    socket2::SockRef::from(&client.writer)
        .send_out_of_band(&[0xf2])
        .unwrap();
    client.send("ABOR");

    assert_eq!(client.read_reply(), "225 Aborted");
    assert_eq!(client.read_reply(), "425 Transfer aborted");
    assert_eq!(client.command("NOOP"), "200 OK");
    drop(data);
}

#[test]
fn test_pipelined_commands() {
    let server = TestServer::start();
    let mut client = server.connect();

    client.writer.write_all(b"USER a\r\nPASS b\r\nPWD\r\n").unwrap();
    assert_eq!(client.read_reply(), "230 OK");
    assert_eq!(client.read_reply(), "230 OK");
    assert_eq!(client.read_reply(), "257 \"/\"");
}

#[test]
fn test_command_overflow_closes_session() {
    let server = TestServer::start_with(|config| config.command_buffer_size = 512);
    let mut client = server.connect();

    client.writer.write_all(&[b'x'; 512]).unwrap();
    let mut rest = String::new();
    let n = client.reader.read_line(&mut rest).unwrap_or(0);
    assert_eq!(n, 0, "unexpected reply {rest:?}");
}

#[test]
fn test_listing_keeps_raw_names() {
    let server = TestServer::start();
    let name = OsStr::from_bytes(b"caf\xe9");
    fs::write(server.root.path().join(name), b"x").unwrap();
    let mut client = server.connect();

    assert_eq!(client.download("NLST"), b"/caf\xe9\r\n");
    let listing = client.download("LIST");
    assert!(listing.ends_with(b" caf\xe9\r\n"), "unexpected listing {listing:?}");

    client.writer.write_all(b"RETR caf\xe9\r\n").unwrap();
    assert_eq!(client.read_reply(), "501 Invalid character in command");
    assert_eq!(client.command("NOOP"), "200 OK");
}

#[test]
fn test_aborted_transfer_leaves_no_progress() {
    let server = TestServer::start();
    fs::write(server.path("idle.bin"), vec![1u8; 4096]).unwrap();
    let progress = server.server.progress();
    let mut client = server.connect();

    client.command("PASV");
    client.send("RETR idle.bin");
    assert_eq!(client.command("ABOR"), "225 Aborted");
    assert_eq!(client.read_reply(), "425 Transfer aborted");

    assert!(progress.snapshot().iter().all(|s| s.name != "/idle.bin"));
}

#[test]
fn test_quit_closes_session() {
    let server = TestServer::start();
    let mut client = server.connect();

    assert_eq!(client.command("QUIT"), "221 disconnecting");
    let mut rest = String::new();
    let n = client.reader.read_line(&mut rest).unwrap_or(0);
    assert_eq!(n, 0);
}

#[test]
fn test_too_many_connections() {
    let server = TestServer::start_with(|config| config.max_sessions = 1);
    let mut first = server.connect();
    assert_eq!(first.command("NOOP"), "200 OK");

    let mut second = FtpClient::connect(server.addr());
    assert_eq!(second.read_reply(), "421 Too many connections");
}

#[test]
fn test_progress_reports_finished_transfer() {
    let server = TestServer::start();
    fs::write(server.path("p.bin"), vec![1u8; 4096]).unwrap();
    let progress = server.server.progress();
    let mut client = server.connect();

    client.download("RETR p.bin");

    let statuses = progress.snapshot();
    let status = statuses
        .iter()
        .find(|s| s.name == "/p.bin")
        .expect("transfer was reported");
    assert!(status.ended);
    assert_eq!(status.size, 4096);
    assert_eq!(status.position, 4096);

    // Ended records are dropped after being reported once
    assert!(progress.snapshot().iter().all(|s| s.name != "/p.bin"));
}

#[test]
fn test_start_stop_lifecycle() {
    let server = TestServer::start();
    assert!(server.server.start_time().is_some());
    assert!(matches!(server.server.start(), Err(ServerError::AlreadyRunning)));

    let addr = server.addr();
    let _client = server.connect();
    server.server.stop().unwrap();
    assert!(server.server.local_addr().is_none());
    assert!(server.server.stop().is_ok());

    assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(500)).is_err());
}

#[test]
fn test_bind_conflict_fails_start() {
    let server = TestServer::start();
    let port = server.addr().port();

    let other = Server::new(ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        control_port: port,
        server_root: server.root.path().to_string_lossy().into_owned(),
        ..ServerConfig::default()
    });
    assert!(other.start().is_err());
}

use std::future::Future;
use std::time::Duration;

use luxtronik_tools::protocol::FrameError;
use luxtronik_tools::{
    Catalog, Client, CommandCode, Endpoint, Error, ExchangeLock, Family, Options, RegisterTable,
    TableError, Value,
};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const CATALOG: &str = r#"{
    "parameters": {
        "span": 2,
        "registers": [
            { "id": 0, "name": "heating_offset", "unit": "°C", "class": { "type": "celsius" } },
            { "id": 1, "name": "hot_water_target", "unit": "°C", "class": { "type": "celsius" } }
        ]
    },
    "calculations": {
        "span": 1,
        "registers": [
            { "id": 0, "name": "outdoor", "unit": "°C", "class": { "type": "celsius" } }
        ]
    },
    "visibilities": {
        "span": 3,
        "registers": [
            { "id": 1, "name": "cooling_visible", "class": { "type": "bool" } }
        ]
    }
}"#;

fn catalog() -> Catalog {
    Catalog::from_json(CATALOG).unwrap()
}

fn isolated_options() -> Options {
    Options {
        exchange_timeout: Some(Duration::from_secs(5)),
        exchange_lock: ExchangeLock::new(),
        ..Options::default()
    }
}

fn frame(words: &[i32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

async fn read_words(stream: &mut TcpStream, count: usize) -> Vec<i32> {
    let mut buffer = vec![0; count * 4];
    stream.read_exact(&mut buffer).await.unwrap();
    buffer
        .chunks_exact(4)
        .map(|c| i32::from_be_bytes(c.try_into().unwrap()))
        .collect()
}

/// Start a fake controller that runs `script` against the first accepted connection and return a
/// client already connected to it.
async fn controller<F, Fut>(options: Options, script: F) -> (Client, JoinHandle<()>)
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        script(stream).await;
    });
    let mut client = Client::new(endpoint, options);
    client.connect().await.unwrap();
    (client, server)
}

#[tokio::test]
async fn reads_parameters() {
    let (mut client, server) = controller(isolated_options(), |mut stream| async move {
        assert_eq!(read_words(&mut stream, 2).await, [3003, 0]);
        stream.write_all(&frame(&[3003, 2, 10, 200])).await.unwrap();
    })
    .await;
    let mut table = RegisterTable::parameters(&catalog()).unwrap();
    client.read_parameters(&mut table).await.unwrap();
    assert_eq!(table.get(0).unwrap().raw_value(), 10);
    assert_eq!(table.get(1).unwrap().raw_value(), 200);
    assert_eq!(table.by_name("hot_water_target").unwrap().from_heat_pump(), Ok(Value::Float(20.0)));
    assert_eq!(table.changed().count(), 2);
    server.await.unwrap();
}

#[tokio::test]
async fn reads_calculations_past_the_status_word() {
    let (mut client, server) = controller(isolated_options(), |mut stream| async move {
        assert_eq!(read_words(&mut stream, 2).await, [3004, 0]);
        stream.write_all(&frame(&[3004, 0, 1, -5])).await.unwrap();
    })
    .await;
    let mut table = RegisterTable::calculations(&catalog()).unwrap();
    client.read_calculations(&mut table).await.unwrap();
    assert_eq!(table.by_name("outdoor").unwrap().from_heat_pump(), Ok(Value::Float(-0.5)));
    server.await.unwrap();
}

#[tokio::test]
async fn reads_visibilities_as_single_bytes() {
    let (mut client, server) = controller(isolated_options(), |mut stream| async move {
        assert_eq!(read_words(&mut stream, 2).await, [3005, 0]);
        let mut response = frame(&[3005, 3]);
        response.extend([1, 0, 1]);
        stream.write_all(&response).await.unwrap();
    })
    .await;
    let mut table = RegisterTable::visibilities(&catalog()).unwrap();
    client.read_visibilities(&mut table).await.unwrap();
    let raw = table.iter_sorted().map(|r| r.raw_value()).collect::<Vec<_>>();
    assert_eq!(raw, [1, 0, 1]);
    assert_eq!(table.get(0).unwrap().name(), "unknown_0");
    assert_eq!(table.get(1).unwrap().from_heat_pump(), Ok(Value::Bool(false)));
    server.await.unwrap();
}

#[tokio::test]
async fn reassembles_fragmented_responses() {
    let (mut client, server) = controller(isolated_options(), |mut stream| async move {
        read_words(&mut stream, 2).await;
        let response = frame(&[3003, 2, 10, 200]);
        for chunk in response.chunks(3) {
            stream.write_all(chunk).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    let mut table = RegisterTable::parameters(&catalog()).unwrap();
    client.read_from_controller(&mut table).await.unwrap();
    assert_eq!(table.get(1).unwrap().raw_value(), 200);
    server.await.unwrap();
}

#[tokio::test]
async fn mismatched_echo_leaves_the_table_alone() {
    let (mut client, server) = controller(isolated_options(), |mut stream| async move {
        read_words(&mut stream, 2).await;
        stream.write_all(&frame(&[3004, 0, 2, 1, 2])).await.unwrap();
    })
    .await;
    let mut table = RegisterTable::parameters(&catalog()).unwrap();
    let result = client.read_parameters(&mut table).await;
    assert!(matches!(
        result,
        Err(Error::Receive(
            FrameError::CommandMismatch { expected: CommandCode::ParametersRead, received: 3004 },
            CommandCode::ParametersRead
        ))
    ));
    assert!(table.iter_sorted().all(|r| r.raw_value() == 0));
    assert!(!client.is_connected());
    server.await.unwrap();
}

#[tokio::test]
async fn wrong_element_count_leaves_the_table_alone() {
    let (mut client, server) = controller(isolated_options(), |mut stream| async move {
        read_words(&mut stream, 2).await;
        stream.write_all(&frame(&[3003, 3, 7, 8, 9])).await.unwrap();
    })
    .await;
    let mut table = RegisterTable::parameters(&catalog()).unwrap();
    let result = client.read_parameters(&mut table).await;
    assert!(matches!(
        result,
        Err(Error::Table(
            TableError::LengthMismatch { family: Family::Parameters, expected: 2, received: 3 },
            Family::Parameters
        ))
    ));
    assert!(table.iter_sorted().all(|r| r.raw_value() == 0));
    server.await.unwrap();
}

#[tokio::test]
async fn safe_mode_sends_nothing() {
    let options = Options { safe_mode: true, ..isolated_options() };
    let (mut client, server) = controller(options, |mut stream| async move {
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    })
    .await;
    assert!(client.safe_mode().is_enabled());
    let result = client.write_parameter(1, 450).await;
    assert!(matches!(result, Err(Error::SafeMode(CommandCode::ParametersWrite))));
    let result = client.write(CommandCode::ParametersWrite, &[1, 450]).await;
    assert!(matches!(result, Err(Error::SafeMode(CommandCode::ParametersWrite))));
    let result = client.write_parameters(&[(0, 5), (1, 450)]).await;
    assert!(matches!(result, Err(Error::SafeMode(CommandCode::ParametersWrite))));
    client.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn writes_a_parameter_and_reads_it_back() {
    let (mut client, server) = controller(isolated_options(), |mut stream| async move {
        assert_eq!(read_words(&mut stream, 3).await, [3002, 1, 450]);
        assert_eq!(read_words(&mut stream, 2).await, [3003, 0]);
        stream.write_all(&frame(&[3003, 2, 0, 450])).await.unwrap();
    })
    .await;
    let mut table = RegisterTable::parameters(&catalog()).unwrap();
    let register = table.by_name("hot_water_target").unwrap();
    let raw = register.to_heat_pump(&register.parse_value("45").unwrap()).unwrap();
    client.write_parameter(register.id(), raw).await.unwrap();
    client.read_parameters(&mut table).await.unwrap();
    assert_eq!(table.get(1).unwrap().from_heat_pump(), Ok(Value::Float(45.0)));
    server.await.unwrap();
}

#[tokio::test]
async fn parameter_writes_do_not_wait_for_an_answer() {
    let (release, released) = tokio::sync::oneshot::channel::<()>();
    let options =
        Options { exchange_timeout: Some(Duration::from_millis(100)), ..isolated_options() };
    let (mut client, server) = controller(options, |mut stream| async move {
        assert_eq!(read_words(&mut stream, 3).await, [3002, 1, 450]);
        let _ = released.await;
    })
    .await;
    client.write_parameter(1, 450).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(client.is_connected());
    drop(release);
    server.await.unwrap();
}

#[tokio::test]
async fn several_parameters_share_one_frame() {
    let (mut client, server) = controller(isolated_options(), |mut stream| async move {
        assert_eq!(read_words(&mut stream, 5).await, [3002, 0, -10, 1, 480]);
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    })
    .await;
    client.write_parameters(&[(0, -10), (1, 480)]).await.unwrap();
    client.write_parameters(&[]).await.unwrap();
    assert!(client.is_connected());
    client.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn acknowledged_writes_consume_each_echo() {
    let options = Options { acknowledged_writes: true, ..isolated_options() };
    let (mut client, server) = controller(options, |mut stream| async move {
        for (id, value) in [(0, -10), (1, 480)] {
            assert_eq!(read_words(&mut stream, 3).await, [3002, id, value]);
            stream.write_all(&frame(&[3002, value])).await.unwrap();
        }
        assert_eq!(read_words(&mut stream, 2).await, [3003, 0]);
        stream.write_all(&frame(&[3003, 2, -10, 480])).await.unwrap();
    })
    .await;
    client.write_parameters(&[(0, -10), (1, 480)]).await.unwrap();
    let mut table = RegisterTable::parameters(&catalog()).unwrap();
    client.read_parameters(&mut table).await.unwrap();
    assert_eq!(table.get(0).unwrap().raw_value(), -10);
    server.await.unwrap();
}

#[tokio::test]
async fn raw_writes_consume_no_response() {
    let (mut client, server) = controller(isolated_options(), |mut stream| async move {
        assert_eq!(read_words(&mut stream, 3).await, [3002, 4, 1]);
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    })
    .await;
    client.write(CommandCode::ParametersWrite, &[4, 1]).await.unwrap();
    assert!(matches!(
        client.write(CommandCode::ParametersRead, &[0]).await,
        Err(Error::NotAWrite(CommandCode::ParametersRead))
    ));
    client.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn silent_controller_times_out() {
    let (release, released) = tokio::sync::oneshot::channel::<()>();
    let options =
        Options { exchange_timeout: Some(Duration::from_millis(100)), ..isolated_options() };
    let (mut client, server) = controller(options, |mut stream| async move {
        read_words(&mut stream, 2).await;
        let _ = released.await;
    })
    .await;
    let mut table = RegisterTable::parameters(&catalog()).unwrap();
    let result = client.read_parameters(&mut table).await;
    assert!(matches!(result, Err(Error::Timeout(CommandCode::ParametersRead, _))));
    assert!(!client.is_connected());
    assert!(matches!(client.read_parameters(&mut table).await, Err(Error::NotConnected)));
    drop(release);
    server.await.unwrap();
}

#[tokio::test]
async fn closed_connection_is_reported() {
    let (mut client, server) = controller(isolated_options(), |mut stream| async move {
        read_words(&mut stream, 2).await;
    })
    .await;
    let mut table = RegisterTable::calculations(&catalog()).unwrap();
    let result = client.read_calculations(&mut table).await;
    assert!(matches!(result, Err(Error::ConnectionClosed(CommandCode::CalculationsRead))));
    server.await.unwrap();
}

#[tokio::test]
async fn exchanges_wait_for_the_shared_lock() {
    let lock = ExchangeLock::new();
    let options = Options { exchange_lock: lock.clone(), ..isolated_options() };
    let (mut client, server) = controller(options, |mut stream| async move {
        read_words(&mut stream, 2).await;
        stream.write_all(&frame(&[3003, 2, 1, 2])).await.unwrap();
    })
    .await;
    let mut table = RegisterTable::parameters(&catalog()).unwrap();
    let guard = lock.acquire().await;
    let blocked =
        tokio::time::timeout(Duration::from_millis(100), client.read_parameters(&mut table)).await;
    assert!(blocked.is_err());
    drop(guard);
    client.read_parameters(&mut table).await.unwrap();
    assert_eq!(table.get(1).unwrap().raw_value(), 2);
    server.await.unwrap();
}

#[tokio::test]
async fn address_strings_default_the_port() {
    let client = Client::with_address("heatpump.local", isolated_options()).unwrap();
    assert_eq!(client.endpoint().port(), luxtronik_tools::DEFAULT_PORT);
    assert!(!client.is_connected());
    assert!(matches!(
        Client::with_address("heatpump:port", isolated_options()),
        Err(Error::InvalidEndpoint(_))
    ));
}

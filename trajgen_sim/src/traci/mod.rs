//! SUMO backend over the TraCI protocol.
//!
//! [`TraciClient`] launches `sumo` with a remote port, connects to it over
//! TCP and speaks blocking request/response TraCI. Each trait call is one
//! round trip.

pub mod codec;

use codec::{
    Command, Decoder, TraciValue, CMD_CHANGELANE, CMD_CLOSE, CMD_GETVERSION,
    CMD_GET_EDGE_VARIABLE, CMD_GET_VEHICLE_VARIABLE, CMD_SET_VEHICLE_VARIABLE, CMD_SIMSTEP,
    ID_LIST, RESPONSE_OFFSET, VAR_EDGES, VAR_LANE_ID, VAR_LANE_INDEX, VAR_MAXSPEED, VAR_POSITION,
    VAR_ROAD_ID, VAR_ROUTE, VAR_SPEED, VAR_WAITING_TIME,
};
use nalgebra::Point2;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command as Process, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};
use trajgen_env::{
    EdgeId, LaneId, MutationFailure, Position, SimError, SpeedCommand, TrafficSimulator, VehicleId,
};

/// How to launch and reach SUMO.
#[derive(Debug, Clone)]
pub struct TraciConfig {
    pub sumo_binary: PathBuf,
    pub net_file: PathBuf,
    pub route_file: PathBuf,
    pub host: String,
    pub port: u16,
    /// Extra arguments appended to the sumo command line
    pub extra_args: Vec<String>,
    /// Connection attempts while sumo is starting up
    pub connect_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for TraciConfig {
    fn default() -> Self {
        Self {
            sumo_binary: PathBuf::from("sumo"),
            net_file: PathBuf::from("data/sumo_network/network.net.xml"),
            route_file: PathBuf::from("data/sumo_network/peak.rou.xml"),
            host: "127.0.0.1".to_string(),
            port: 8813,
            extra_args: Vec::new(),
            connect_attempts: 50,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl TraciConfig {
    /// Full sumo command line, binary excluded.
    pub fn sumo_args(&self) -> Vec<String> {
        let mut args = vec![
            "-n".to_string(),
            self.net_file.display().to_string(),
            "-r".to_string(),
            self.route_file.display().to_string(),
            "--start".to_string(),
            "--quit-on-end".to_string(),
            "--remote-port".to_string(),
            self.port.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Blocking TraCI client implementing [`TrafficSimulator`].
pub struct TraciClient {
    stream: TcpStream,
    child: Option<Child>,
    steps: u64,
    closed: bool,
}

impl TraciClient {
    /// Starts sumo and connects to it.
    pub fn launch(config: &TraciConfig) -> Result<Self, SimError> {
        let args = config.sumo_args();
        info!(
            "Launching {} {}",
            config.sumo_binary.display(),
            args.join(" ")
        );

        let mut child = Process::new(&config.sumo_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| {
                SimError::startup(format!(
                    "could not start {}: {}",
                    config.sumo_binary.display(),
                    e
                ))
            })?;

        let mut last_error = String::from("no connection attempt made");
        for attempt in 0..config.connect_attempts {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(SimError::startup(format!("sumo exited early: {}", status)));
            }
            match TcpStream::connect((config.host.as_str(), config.port)) {
                Ok(stream) => {
                    debug!("Connected to sumo after {} attempts", attempt + 1);
                    let mut client = Self::from_stream(stream, Some(child))?;
                    let (api, version) = client.version().map_err(|e| {
                        SimError::startup(format!("version handshake failed: {}", e))
                    })?;
                    info!("Connected to {} (TraCI API {})", version, api);
                    return Ok(client);
                }
                Err(e) => {
                    last_error = e.to_string();
                    std::thread::sleep(config.retry_delay);
                }
            }
        }

        // Best effort, the process is abandoned either way
        let _ = child.kill();
        Err(SimError::startup(format!(
            "could not connect to {}:{}: {}",
            config.host, config.port, last_error
        )))
    }

    /// Wraps an already-open connection (for a sumo started elsewhere).
    pub fn from_stream(stream: TcpStream, child: Option<Child>) -> Result<Self, SimError> {
        // Owned before anything can fail, so Drop reaps the child
        let client = Self {
            stream,
            child,
            steps: 0,
            closed: false,
        };
        client.stream.set_nodelay(true)?;
        Ok(client)
    }

    /// Queries `(api version, sumo identifier)`.
    pub fn version(&mut self) -> Result<(i32, String), SimError> {
        let body = self.exchange(&Command::empty(CMD_GETVERSION))?;
        let mut dec = Decoder::new(&body);
        check(dec.status(CMD_GETVERSION)?, "getVersion")?;
        let (id, _) = dec.command_header()?;
        if id != CMD_GETVERSION {
            return Err(SimError::Protocol(format!("unexpected version response 0x{:02x}", id)));
        }
        Ok((dec.i32()?, dec.string()?))
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Sends one command and returns the raw response body.
    fn exchange(&mut self, command: &Command) -> Result<Vec<u8>, SimError> {
        if self.closed {
            return Err(SimError::Closed);
        }
        self.stream
            .write_all(&codec::encode_message(std::slice::from_ref(command)))?;

        let mut len = [0u8; 4];
        self.stream.read_exact(&mut len)?;
        let total = i32::from_be_bytes(len);
        let body_len = usize::try_from(total)
            .ok()
            .and_then(|n| n.checked_sub(4))
            .ok_or_else(|| SimError::Protocol(format!("bad message length {}", total)))?;

        let mut body = vec![0u8; body_len];
        self.stream.read_exact(&mut body)?;
        Ok(body)
    }

    fn get(&mut self, domain: u8, variable: u8, object: &str) -> Result<TraciValue, SimError> {
        let body = self.exchange(&Command::get(domain, variable, object))?;
        let mut dec = Decoder::new(&body);
        let status = dec.status(domain)?;
        if !status.is_ok() {
            return Err(SimError::query(
                format!("0x{:02x} of '{}'", variable, object),
                status.failure(),
            ));
        }
        dec.variable_response(domain + RESPONSE_OFFSET, variable, object)
    }

    fn get_vehicle(&mut self, variable: u8, id: &VehicleId) -> Result<TraciValue, SimError> {
        self.get(CMD_GET_VEHICLE_VARIABLE, variable, id.as_str())
    }

    fn set_vehicle(
        &mut self,
        variable: u8,
        id: &VehicleId,
        value: TraciValue,
    ) -> Result<(), MutationFailure> {
        let command = Command::set(CMD_SET_VEHICLE_VARIABLE, variable, id.as_str(), &value);
        let body = self
            .exchange(&command)
            .map_err(|e| MutationFailure::Transport(e.to_string()))?;
        let status = Decoder::new(&body)
            .status(CMD_SET_VEHICLE_VARIABLE)
            .map_err(|e| MutationFailure::Transport(e.to_string()))?;

        if status.is_ok() {
            Ok(())
        } else {
            Err(classify_rejection(id, &status.failure()))
        }
    }
}

fn check(status: codec::Status, what: &str) -> Result<(), SimError> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(SimError::Protocol(format!("{} refused: {}", what, status.failure())))
    }
}

/// Maps a SUMO error text onto a mutation failure.
fn classify_rejection(id: &VehicleId, message: &str) -> MutationFailure {
    if message.contains("is not known") && message.contains(id.as_str()) {
        MutationFailure::UnknownVehicle(id.clone())
    } else {
        MutationFailure::Rejected(message.to_string())
    }
}

impl TrafficSimulator for TraciClient {
    fn advance_tick(&mut self) -> Result<(), SimError> {
        let tick = self.steps;
        let mut content = codec::Encoder::new();
        content.f64(0.0);

        let body = self.exchange(&Command::new(CMD_SIMSTEP, content))?;
        let mut dec = Decoder::new(&body);
        let status = dec.status(CMD_SIMSTEP)?;
        if !status.is_ok() {
            return Err(SimError::Advance {
                tick,
                reason: status.failure(),
            });
        }
        let subscriptions = dec.i32()?;
        if subscriptions != 0 {
            warn!("Ignoring {} unexpected subscription results", subscriptions);
        }

        self.steps += 1;
        Ok(())
    }

    fn active_vehicles(&mut self) -> Result<Vec<VehicleId>, SimError> {
        let ids = self
            .get(CMD_GET_VEHICLE_VARIABLE, ID_LIST, "")?
            .into_string_list()?;
        Ok(ids.into_iter().map(VehicleId::new).collect())
    }

    fn position(&mut self, id: &VehicleId) -> Result<Position, SimError> {
        let (x, y) = self.get_vehicle(VAR_POSITION, id)?.as_position()?;
        Ok(Point2::new(x, y))
    }

    fn speed(&mut self, id: &VehicleId) -> Result<f64, SimError> {
        self.get_vehicle(VAR_SPEED, id)?.as_f64()
    }

    fn waiting_time(&mut self, id: &VehicleId) -> Result<f64, SimError> {
        self.get_vehicle(VAR_WAITING_TIME, id)?.as_f64()
    }

    fn lane_id(&mut self, id: &VehicleId) -> Result<LaneId, SimError> {
        Ok(LaneId::new(self.get_vehicle(VAR_LANE_ID, id)?.into_string()?))
    }

    fn max_speed(&mut self, id: &VehicleId) -> Result<f64, SimError> {
        self.get_vehicle(VAR_MAXSPEED, id)?.as_f64()
    }

    fn lane_index(&mut self, id: &VehicleId) -> Result<u32, SimError> {
        let index = self.get_vehicle(VAR_LANE_INDEX, id)?.as_i32()?;
        // -1 while the vehicle is on a junction internal lane
        Ok(index.max(0) as u32)
    }

    fn road_id(&mut self, id: &VehicleId) -> Result<EdgeId, SimError> {
        Ok(EdgeId::new(self.get_vehicle(VAR_ROAD_ID, id)?.into_string()?))
    }

    fn lane_count(&mut self, road: &EdgeId) -> Result<u32, SimError> {
        let count = self
            .get(CMD_GET_EDGE_VARIABLE, VAR_LANE_INDEX, road.as_str())?
            .as_i32()?;
        Ok(count.max(0) as u32)
    }

    fn route(&mut self, id: &VehicleId) -> Result<Vec<EdgeId>, SimError> {
        let edges = self.get_vehicle(VAR_EDGES, id)?.into_string_list()?;
        Ok(edges.into_iter().map(EdgeId::new).collect())
    }

    fn request_lane_change(
        &mut self,
        id: &VehicleId,
        target_index: u32,
        urgency: f64,
    ) -> Result<(), MutationFailure> {
        let lane = i8::try_from(target_index).map_err(|_| MutationFailure::InvalidLane {
            requested: target_index as i64,
            lane_count: i8::MAX as u32,
        })?;
        self.set_vehicle(
            CMD_CHANGELANE,
            id,
            TraciValue::Compound(vec![TraciValue::Byte(lane), TraciValue::Double(urgency)]),
        )
    }

    fn set_route(&mut self, id: &VehicleId, edges: &[EdgeId]) -> Result<(), MutationFailure> {
        let edges = edges.iter().map(|e| e.as_str().to_string()).collect();
        self.set_vehicle(VAR_ROUTE, id, TraciValue::StringList(edges))
    }

    fn set_speed(&mut self, id: &VehicleId, command: SpeedCommand) -> Result<(), MutationFailure> {
        self.set_vehicle(VAR_SPEED, id, TraciValue::Double(command.wire_value()))
    }

    fn close(&mut self) -> Result<(), SimError> {
        if self.closed {
            return Ok(());
        }
        let result = self
            .exchange(&Command::empty(CMD_CLOSE))
            .and_then(|body| check(Decoder::new(&body).status(CMD_CLOSE)?, "close"));
        self.closed = true;
        let _ = self.stream.shutdown(Shutdown::Both);

        if let Some(mut child) = self.child.take() {
            match child.wait() {
                Ok(status) => debug!("sumo exited: {}", status),
                Err(e) => warn!("Waiting for sumo failed: {}", e),
            }
        }
        result
    }
}

impl Drop for TraciClient {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            // Not closed cleanly: do not leave sumo running
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

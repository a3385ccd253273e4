//! Simulated repeater device for local development and tests.
//!
//! A register-file model of the real unit behind [`RpcChannel`]: getters are
//! calls with no arguments, setters mutate the register and echo back. The
//! agent's `--simulate` mode runs on this, and the engine tests use the call
//! log to assert ordering.

use std::collections::HashSet;

use crate::rpc::{RpcChannel, RpcError, Value};

/// In-memory repeater device with plausible defaults.
#[derive(Debug, Clone)]
pub struct SimulatedRepeater {
    pub boxcal: Vec<f64>,
    pub dl_atten: [f64; 4],
    pub ul_atten: [f64; 4],
    pub center_freq_hz: f64,
    /// (cancellation, auto-gain) flags.
    pub mode: [i64; 2],
    pub gain: f64,
    pub pa_enable: [i64; 2],
    pub tdd_mode: [i64; 2],
    pub lowgain: i64,
    pub filter_bypass: i64,
    pub bank_sel: i64,
    /// (ssb arfcn, start Hz, stop Hz, step Hz) — step > 0 means free search.
    pub search_freq: [f64; 4],
    pub schedule_slots: [i64; 7],
    pub blanking: String,
    pub repeater_params: Vec<f64>,
    pub uptime: f64,
    /// Seconds added to `uptime` per `secs_alive` read. Zero in tests that
    /// drive the clock themselves.
    pub uptime_step: f64,
    pub oscillating: bool,
    /// Methods that fail with a transport error — for fault-injection tests.
    pub fail_methods: HashSet<String>,
    /// Every call in arrival order.
    pub call_log: Vec<(String, Vec<Value>)>,
}

impl Default for SimulatedRepeater {
    fn default() -> Self {
        SimulatedRepeater {
            boxcal: vec![0.0, 0.0, 5.0, 5.0, 0.0, 0.0, 10.0, 10.0, -20.0, -25.0],
            dl_atten: [100.0, 100.0, 8.0, 8.0],
            ul_atten: [100.0, 100.0, 8.0, 8.0],
            center_freq_hz: 3.51e9,
            mode: [1, 0],
            gain: 20.0,
            pa_enable: [1, 1],
            tdd_mode: [0, 1],
            lowgain: 0,
            filter_bypass: 0,
            bank_sel: 12, // 100 MHz
            search_freq: [0.0, 3.46e9, 3.56e9, 1.0e6],
            schedule_slots: [7, 2, 7, 2, 6, 4, 4],
            blanking: String::new(),
            repeater_params: vec![50.0, 0.0, 0.0, 0.0],
            uptime: 100.0,
            uptime_step: 1.0,
            oscillating: false,
            fail_methods: HashSet::new(),
            call_log: Vec::new(),
        }
    }
}

impl SimulatedRepeater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the logged calls, for ordering assertions.
    pub fn called_methods(&self) -> Vec<&str> {
        self.call_log.iter().map(|(m, _)| m.as_str()).collect()
    }

    pub fn clear_log(&mut self) {
        self.call_log.clear();
    }

    fn floats(v: &[f64]) -> Value {
        Value::List(v.iter().map(|&f| Value::Float(f)).collect())
    }

    fn ints(v: &[i64]) -> Value {
        Value::List(v.iter().map(|&i| Value::Int(i)).collect())
    }

    fn arg_f64(args: &[Value], i: usize, method: &str) -> Result<f64, RpcError> {
        args.get(i).and_then(Value::as_f64).ok_or(RpcError::BadReply {
            method: method.to_string(),
            expected: "numeric argument",
        })
    }

    fn dispatch(&mut self, method: &str, args: &[Value]) -> Result<Value, RpcError> {
        let ok = Value::Int(0);
        match method {
            "vendor" | "tuner_reset" | "dac_fr_accum_reset" | "tdd_sync_stop"
            | "tdd_sync_start_search" | "tdd_sync_start_search_arfcn" => Ok(ok),

            "get_boxcal_data" => Ok(Self::floats(&self.boxcal)),

            "dl_atten" | "ul_atten" => {
                let regs = if method == "dl_atten" {
                    &mut self.dl_atten
                } else {
                    &mut self.ul_atten
                };
                if !args.is_empty() {
                    for i in 0..4 {
                        regs[i] = Self::arg_f64(args, i, method)?;
                    }
                }
                let regs = *regs;
                Ok(Self::floats(&regs))
            }

            "center_freq" => {
                if let Some(arg) = args.first() {
                    self.center_freq_hz = arg.as_f64().unwrap_or(self.center_freq_hz);
                }
                Ok(Value::Float(self.center_freq_hz))
            }

            "mode" => {
                if args.len() >= 2 {
                    self.mode = [
                        Self::arg_f64(args, 0, method)? as i64,
                        Self::arg_f64(args, 1, method)? as i64,
                    ];
                }
                Ok(Self::ints(&self.mode))
            }

            "gain" => {
                if let Some(arg) = args.first() {
                    self.gain = arg.as_f64().unwrap_or(self.gain);
                }
                Ok(Value::Float(self.gain))
            }

            "pa_enable" => {
                if args.len() >= 2 {
                    self.pa_enable = [
                        Self::arg_f64(args, 0, method)? as i64,
                        Self::arg_f64(args, 1, method)? as i64,
                    ];
                }
                Ok(Self::ints(&self.pa_enable))
            }

            "tdd_mode" => {
                if args.len() >= 2 {
                    self.tdd_mode = [
                        Self::arg_f64(args, 0, method)? as i64,
                        Self::arg_f64(args, 1, method)? as i64,
                    ];
                }
                Ok(Self::ints(&self.tdd_mode))
            }

            "tuner_lowgain_mode" => {
                if let Some(arg) = args.first() {
                    self.lowgain = arg.as_i64().unwrap_or(self.lowgain);
                }
                Ok(Value::Int(self.lowgain))
            }

            "bypass_chan_fir" => {
                if let Some(arg) = args.first() {
                    self.filter_bypass = arg.as_i64().unwrap_or(self.filter_bypass);
                }
                Ok(Value::Int(self.filter_bypass))
            }

            "chan_fir_bank_sel" => {
                if let Some(arg) = args.first() {
                    self.bank_sel = arg.as_i64().unwrap_or(self.bank_sel);
                }
                Ok(Value::Int(self.bank_sel))
            }

            "tdd_sync_search_freq" => Ok(Self::floats(&self.search_freq)),

            "tdd_frame_schedule" => {
                if args.len() >= 7 {
                    for i in 0..7 {
                        self.schedule_slots[i] = Self::arg_f64(args, i, method)? as i64;
                    }
                    self.blanking = args
                        .get(7)
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                }
                let mut out: Vec<Value> =
                    self.schedule_slots.iter().map(|&v| Value::Int(v)).collect();
                out.push(Value::Text(self.blanking.clone()));
                Ok(Value::List(out))
            }

            "repeater_params" => {
                if !args.is_empty() {
                    self.repeater_params = args
                        .iter()
                        .map(|a| {
                            a.as_f64().ok_or(RpcError::BadReply {
                                method: method.to_string(),
                                expected: "numeric argument",
                            })
                        })
                        .collect::<Result<_, _>>()?;
                }
                Ok(Self::floats(&self.repeater_params))
            }

            "secs_alive" => {
                let now = self.uptime;
                self.uptime += self.uptime_step;
                Ok(Value::Float(now))
            }

            "accum_status" => Ok(Self::ints(&[0, self.oscillating as i64])),

            "read_powers" => Ok(Self::floats(&[-12.5; 24])),
            "get_delchan_pwrs" => Ok(Self::floats(&[-65.0; 8])),
            "get_fullchan_pwrs" => Ok(Self::floats(&[-45.0; 8])),

            "tdd_sync_status" => Ok(Self::floats(&[2.0, 648_672.0, 482.0, 4.0, -55.0, 8.2])),

            other => Err(RpcError::Transport(format!("unknown method `{other}`"))),
        }
    }
}

impl RpcChannel for SimulatedRepeater {
    fn call(&mut self, method: &str, args: &[Value]) -> Result<Value, RpcError> {
        self.call_log.push((method.to_string(), args.to_vec()));
        if self.fail_methods.contains(method) {
            return Err(RpcError::Transport(format!(
                "simulated failure calling `{method}`"
            )));
        }
        self.dispatch(method, args)
    }

    fn call_noreply(&mut self, method: &str, args: &[Value]) -> Result<(), RpcError> {
        self.call_log.push((method.to_string(), args.to_vec()));
        Ok(())
    }
}

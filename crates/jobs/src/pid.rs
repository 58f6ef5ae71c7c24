// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Discrete PID controller with output clamping and anti-windup.

#[derive(Debug, Clone)]
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: f64,
    output_min: f64,
    output_max: f64,
    integral: f64,
    last_error: Option<f64>,
}

impl Pid {
    pub fn new(kp: f64, ki: f64, kd: f64, setpoint: f64, output_min: f64, output_max: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint,
            output_min,
            output_max,
            integral: 0.0,
            last_error: None,
        }
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// Change the setpoint; the integral is kept so the loop does not jolt.
    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    /// One controller step with `dt` seconds since the previous one.
    pub fn update(&mut self, measurement: f64, dt: f64) -> f64 {
        let error = self.setpoint - measurement;
        let derivative = match self.last_error {
            Some(last) if dt > 0.0 => (error - last) / dt,
            _ => 0.0,
        };
        self.last_error = Some(error);

        let candidate_integral = self.integral + error * dt;
        let unclamped = self.kp * error + self.ki * candidate_integral + self.kd * derivative;
        let output = unclamped.clamp(self.output_min, self.output_max);
        // Anti-windup: only integrate while the output is not saturated.
        if (output - unclamped).abs() < f64::EPSILON {
            self.integral = candidate_integral;
        }
        output
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = None;
    }
}

#[cfg(test)]
#[path = "pid_tests.rs"]
mod tests;

//! Dynamic window approach parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

use super::DwaError;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the dynamic window velocity search
#[derive(Deserialize, Debug, Clone)]
pub struct DwaParams {
    /// Maximum forward speed
    pub max_speed_ms: f64,

    /// Minimum forward speed, negative values allow reversing
    pub min_speed_ms: f64,

    /// Maximum absolute turn rate
    pub max_yaw_rate_rads: f64,

    /// Maximum linear acceleration
    pub max_accel_mss: f64,

    /// Maximum angular acceleration
    pub max_delta_yaw_rate_radss: f64,

    /// Linear speed sampling resolution
    pub v_resolution_ms: f64,

    /// Turn rate sampling resolution
    pub yaw_rate_resolution_rads: f64,

    /// Integration timestep of the trajectory simulation. This is also the control period used to
    /// compute the dynamic window.
    pub dt_s: f64,

    /// Prediction horizon of the trajectory simulation
    pub predict_time_s: f64,

    /// Weight of the heading error to the local goal
    pub to_goal_cost_gain: f64,

    /// Weight of the speed term, rewards faster trajectories
    pub speed_cost_gain: f64,

    /// Weight of the clearance term, rewards trajectories further from obstacles
    pub obstacle_cost_gain: f64,

    /// Collision footprint of the vehicle
    pub footprint: Footprint,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Collision footprint of the vehicle, centred on the Robot Body frame origin.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "type")]
pub enum Footprint {
    Circle {
        radius_m: f64,
    },

    /// Rectangle with its length along the body X axis.
    Rectangle {
        length_m: f64,
        width_m: f64,
    },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DwaParams {
    /// The lookahead threshold, the furthest the vehicle could travel in one prediction horizon.
    pub fn lookahead_threshold_m(&self) -> f64 {
        self.max_speed_ms * self.predict_time_s
    }

    /// Number of integration steps in one prediction horizon
    pub fn num_sim_steps(&self) -> usize {
        (self.predict_time_s / self.dt_s).round() as usize
    }

    /// Check the parameters describe a usable search.
    pub fn validate(&self) -> Result<(), DwaError> {
        let positive = [
            ("max_speed_ms", self.max_speed_ms),
            ("max_yaw_rate_rads", self.max_yaw_rate_rads),
            ("max_accel_mss", self.max_accel_mss),
            ("max_delta_yaw_rate_radss", self.max_delta_yaw_rate_radss),
            ("v_resolution_ms", self.v_resolution_ms),
            ("yaw_rate_resolution_rads", self.yaw_rate_resolution_rads),
            ("dt_s", self.dt_s),
            ("predict_time_s", self.predict_time_s),
        ];
        for (name, value) in positive.iter() {
            if !(*value > 0.0 && value.is_finite()) {
                return Err(DwaError::InvalidParams(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        let gains = [
            ("to_goal_cost_gain", self.to_goal_cost_gain),
            ("speed_cost_gain", self.speed_cost_gain),
            ("obstacle_cost_gain", self.obstacle_cost_gain),
        ];
        for (name, value) in gains.iter() {
            if !(*value >= 0.0 && value.is_finite()) {
                return Err(DwaError::InvalidParams(format!(
                    "{} must not be negative, got {}",
                    name, value
                )));
            }
        }

        if self.min_speed_ms > self.max_speed_ms {
            return Err(DwaError::InvalidParams(format!(
                "min_speed_ms ({}) is greater than max_speed_ms ({})",
                self.min_speed_ms, self.max_speed_ms
            )));
        }

        if self.predict_time_s < self.dt_s {
            return Err(DwaError::InvalidParams(
                "predict_time_s must be at least one dt_s".into(),
            ));
        }

        let footprint_ok = match self.footprint {
            Footprint::Circle { radius_m } => radius_m > 0.0,
            Footprint::Rectangle { length_m, width_m } => length_m > 0.0 && width_m > 0.0,
        };
        if !footprint_ok {
            return Err(DwaError::InvalidParams(format!(
                "Footprint dimensions must be positive, got {:?}",
                self.footprint
            )));
        }

        Ok(())
    }
}

/// Parameters used by the unit tests of this crate.
#[cfg(test)]
pub(crate) fn test_params() -> DwaParams {
    DwaParams {
        max_speed_ms: 1.0,
        min_speed_ms: -0.5,
        max_yaw_rate_rads: 40f64.to_radians(),
        max_accel_mss: 0.2,
        max_delta_yaw_rate_radss: 40f64.to_radians(),
        v_resolution_ms: 0.01,
        yaw_rate_resolution_rads: 1f64.to_radians(),
        dt_s: 0.1,
        predict_time_s: 3.0,
        to_goal_cost_gain: 0.15,
        speed_cost_gain: 1.0,
        obstacle_cost_gain: 1.0,
        footprint: Footprint::Circle { radius_m: 0.3 },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_load() {
        let params: DwaParams = util::params::from_str(
            r#"
            max_speed_ms = 1.0
            min_speed_ms = -0.5
            max_yaw_rate_rads = 0.698
            max_accel_mss = 0.2
            max_delta_yaw_rate_radss = 0.698
            v_resolution_ms = 0.01
            yaw_rate_resolution_rads = 0.0175
            dt_s = 0.1
            predict_time_s = 3.0
            to_goal_cost_gain = 0.15
            speed_cost_gain = 1.0
            obstacle_cost_gain = 1.0

            [footprint]
            type = "Rectangle"
            length_m = 0.6
            width_m = 0.4
            "#,
        )
        .unwrap();

        assert_eq!(
            params.footprint,
            Footprint::Rectangle {
                length_m: 0.6,
                width_m: 0.4
            }
        );
        assert!(params.validate().is_ok());
        assert!((params.lookahead_threshold_m() - 3.0).abs() < 1e-12);
        assert_eq!(params.num_sim_steps(), 30);
    }

    #[test]
    fn test_validate() {
        assert!(test_params().validate().is_ok());

        let mut p = test_params();
        p.v_resolution_ms = 0.0;
        assert!(p.validate().is_err());

        let mut p = test_params();
        p.min_speed_ms = 2.0;
        assert!(p.validate().is_err());

        let mut p = test_params();
        p.footprint = Footprint::Circle { radius_m: -1.0 };
        assert!(p.validate().is_err());

        let mut p = test_params();
        p.speed_cost_gain = std::f64::NAN;
        assert!(p.validate().is_err());
    }
}

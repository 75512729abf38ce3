pub mod pandapower;
